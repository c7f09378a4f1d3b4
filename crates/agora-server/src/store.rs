//! Shared access to the SQLite database.
//!
//! `rusqlite::Connection` is synchronous, so every component goes through
//! [`Store::with`], which holds the lock for the duration of one closure.
//! The closure cannot `.await`, so the lock is never held across a
//! suspension point.

use std::sync::{Arc, Mutex};

use agora_store::{Database, StoreError};

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Run `f` with exclusive access to the database.
    pub fn with<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Database) -> Result<T, StoreError>,
    {
        let mut db = self
            .db
            .lock()
            .map_err(|_| StoreError::Unavailable("database lock poisoned".into()))?;
        f(&mut db)
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Database::open_in_memory().expect("in-memory database"))
    }

    /// Leave the lock poisoned, as a panic inside [`Store::with`] would.
    #[cfg(test)]
    pub fn poison(&self) {
        let db = Arc::clone(&self.db);
        let _ = std::thread::spawn(move || {
            let _guard = db.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
    }

    #[cfg(test)]
    pub fn clear_poison(&self) {
        self.db.clear_poison();
    }
}
