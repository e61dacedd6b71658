//! Identity seed storage.
//!
//! The single-row `identity` table holds the 32-byte master seed. Loading
//! returns `None` on a fresh database so the caller can generate and save a
//! new identity.

use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Persist the identity seed, replacing any previous one.
    pub fn save_identity_seed(&self, seed: &[u8; 32]) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO identity (id, seed) VALUES (0, ?1)",
            params![seed.as_slice()],
        )?;
        Ok(())
    }

    /// Load the stored seed, if one exists.
    pub fn load_identity_seed(&self) -> Result<Option<[u8; 32]>> {
        let result = self.conn().query_row(
            "SELECT seed FROM identity WHERE id = 0",
            [],
            |row| {
                let blob: Vec<u8> = row.get(0)?;
                <[u8; 32]>::try_from(blob.as_slice()).map_err(|_| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Blob,
                        format!("identity seed must be 32 bytes, got {}", blob.len()).into(),
                    )
                })
            },
        );
        match result {
            Ok(seed) => Ok(Some(seed)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(other.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_identity_seed().unwrap().is_none());

        let seed = [7u8; 32];
        db.save_identity_seed(&seed).unwrap();
        assert_eq!(db.load_identity_seed().unwrap(), Some(seed));

        let replacement = [9u8; 32];
        db.save_identity_seed(&replacement).unwrap();
        assert_eq!(db.load_identity_seed().unwrap(), Some(replacement));
    }
}
