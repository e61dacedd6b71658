//! Executor that delivers a composed message to its destination.
//!
//! Sealing happens here, at execution time, so each attempt gets a fresh
//! nonce and group sends always use the key current at delivery, not the
//! one current at composition.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use umbra_shared::blinding::{self, BlindedKeyPair};
use umbra_shared::{envelope, ConfigNamespace};
use umbra_store::{Job, MessageStatus};

use crate::context::{now_ms, ClientContext};
use crate::error::{from_bytes, ClientError, Result};
use crate::events::UserNotification;
use crate::jobs::{JobExecutor, JobOutcome, MessageSendDetails, VARIANT_MESSAGE_SEND};
use crate::pipeline::Destination;

pub struct MessageSendExecutor {
    ctx: Arc<ClientContext>,
}

impl MessageSendExecutor {
    pub fn new(ctx: Arc<ClientContext>) -> Self {
        Self { ctx }
    }

    async fn deliver(&self, details: &MessageSendDetails) -> Result<()> {
        let now = now_ms();
        let ttl = self.ctx.config().message_ttl_ms;

        match &details.destination {
            Destination::Contact(recipient) => {
                let sealed = envelope::seal(&details.content, self.ctx.identity(), &recipient.key)?;
                self.ctx
                    .snode()
                    .store(None, recipient, ConfigNamespace::Default, &sealed, ttl, now)
                    .await?;
            }
            Destination::Group(group) => {
                let public_key = self
                    .ctx
                    .db()
                    .current_group_key_pair(group)?
                    .map(|pair| pair.public_key)
                    .ok_or(ClientError::NoGroupKey(*group))?;
                let sealed = envelope::seal(&details.content, self.ctx.identity(), &public_key)?;
                self.ctx
                    .snode()
                    .store(
                        None,
                        group,
                        ConfigNamespace::GroupMessages,
                        &sealed,
                        ttl,
                        now,
                    )
                    .await?;
            }
            Destination::CommunityRoom { community_key } => {
                let community = self.community(community_key)?;
                let keys = BlindedKeyPair::derive(self.ctx.identity(), &community.server_pubkey);
                self.ctx
                    .community(&community.server_url, community.server_pubkey)
                    .send_room(&keys, &community.room, &details.content, now)
                    .await?;
            }
            Destination::CommunityInbox {
                community_key,
                recipient,
            } => {
                let community = self.community(community_key)?;
                let keys = BlindedKeyPair::derive(self.ctx.identity(), &community.server_pubkey);
                let sealed = blinding::seal_to_blinded(&details.content, &keys, &recipient.key)?;
                self.ctx
                    .community(&community.server_url, community.server_pubkey)
                    .send_inbox(&keys, recipient, &sealed, now)
                    .await?;
            }
        }
        Ok(())
    }

    fn community(&self, key: &str) -> Result<umbra_store::Community> {
        self.ctx
            .db()
            .get_community(key)
            .map_err(|_| ClientError::UnknownCommunity(key.to_string()))
    }
}

#[async_trait]
impl JobExecutor for MessageSendExecutor {
    fn variant(&self) -> &'static str {
        VARIANT_MESSAGE_SEND
    }

    async fn run(&self, job: &Job) -> Result<JobOutcome> {
        let details: MessageSendDetails = from_bytes(&job.details)?;
        self.deliver(&details).await?;

        if let Some(message_id) = details.message_id {
            self.ctx
                .db()
                .set_message_status(message_id, MessageStatus::Sent)?;
            debug!(%message_id, "Message delivered");
        }
        Ok(JobOutcome::Success)
    }

    async fn on_permanent_failure(&self, job: &Job) -> Result<()> {
        let details: MessageSendDetails = from_bytes(&job.details)?;
        if let Some(message_id) = details.message_id {
            self.ctx
                .db()
                .set_message_status(message_id, MessageStatus::Failed)?;
        }
        if let Some(thread_id) = &job.thread_id {
            self.ctx.notifier().notify(UserNotification::MessageFailed {
                thread_id: thread_id.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{context, context_with_notifier};
    use crate::error::to_bytes;
    use crate::events::testing::RecordingNotifier;
    use chrono::Utc;
    use umbra_shared::protocol::{Content, VisibleMessage};
    use umbra_shared::Identity;
    use umbra_store::{Message, Thread, ThreadKind};
    use uuid::Uuid;

    fn message_job(details: &MessageSendDetails, thread_id: &str) -> Job {
        Job {
            id: Uuid::new_v4(),
            variant: VARIANT_MESSAGE_SEND.to_string(),
            thread_id: Some(thread_id.to_string()),
            details: to_bytes(details).unwrap(),
            failure_count: 0,
            max_failure_count: 10,
            uniqueness_key: None,
            next_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    fn content_bytes() -> Vec<u8> {
        Content::Visible(VisibleMessage {
            message_id: Uuid::new_v4(),
            body: Some("hi".to_string()),
            attachment_ids: Vec::new(),
            profile: None,
            sent_at_ms: 1_000,
        })
        .to_bytes()
        .unwrap()
    }

    fn seed_message(ctx: &ClientContext, thread_id: &str) -> Uuid {
        let db = ctx.db();
        db.upsert_thread(&Thread {
            id: thread_id.to_string(),
            kind: ThreadKind::Direct,
            priority: 0,
            created_at: Utc::now(),
        })
        .unwrap();
        let id = Uuid::new_v4();
        db.insert_message(&Message {
            id,
            thread_id: thread_id.to_string(),
            sender: ctx.account_id(),
            body: Some("hi".to_string()),
            sent_at: Utc::now(),
            received_at: Utc::now(),
            is_outgoing: true,
            status: MessageStatus::Sending,
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn contact_delivery_marks_the_row_sent() {
        let (ctx, mock) = context();
        let executor = MessageSendExecutor::new(ctx.clone());
        let recipient = Identity::generate().account_id();
        let thread_id = recipient.to_hex();
        let message_id = seed_message(&ctx, &thread_id);

        mock.push_json(200, &serde_json::json!({ "hash": "h1" }));
        let details = MessageSendDetails {
            destination: Destination::Contact(recipient),
            content: content_bytes(),
            message_id: Some(message_id),
        };
        let job = message_job(&details, &thread_id);

        let outcome = executor.run(&job).await.unwrap();
        assert_eq!(outcome, JobOutcome::Success);
        assert_eq!(
            ctx.db().get_message(message_id).unwrap().status,
            MessageStatus::Sent
        );
    }

    #[tokio::test]
    async fn group_send_without_a_key_is_terminal() {
        let (ctx, _) = context();
        let executor = MessageSendExecutor::new(ctx.clone());
        let group = Identity::generate().account_id();

        let details = MessageSendDetails {
            destination: Destination::Group(group),
            content: content_bytes(),
            message_id: None,
        };
        let job = message_job(&details, &group.to_hex());

        let error = executor.run(&job).await.unwrap_err();
        assert!(error.is_terminal());
    }

    #[tokio::test]
    async fn permanent_failure_marks_the_row_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::default());
        let (ctx, _) = context_with_notifier(notifier.clone());
        let executor = MessageSendExecutor::new(ctx.clone());
        let recipient = Identity::generate().account_id();
        let thread_id = recipient.to_hex();
        let message_id = seed_message(&ctx, &thread_id);

        let details = MessageSendDetails {
            destination: Destination::Contact(recipient),
            content: content_bytes(),
            message_id: Some(message_id),
        };
        let job = message_job(&details, &thread_id);

        executor.on_permanent_failure(&job).await.unwrap();
        assert_eq!(
            ctx.db().get_message(message_id).unwrap().status,
            MessageStatus::Failed
        );
        assert_eq!(
            notifier.notifications.lock().unwrap().as_slice(),
            &[UserNotification::MessageFailed { thread_id }]
        );
    }
}
