//! Catalog cache owned by the database handle
//!
//! Places and sessions only change during catalog reconciliation, which
//! clears the cache.

use super::schema::{Place, Session};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct CatalogCache {
    places: Mutex<Option<Vec<Place>>>,
    sessions: Mutex<HashMap<i64, Session>>,
}

impl CatalogCache {
    pub fn places(&self) -> Option<Vec<Place>> {
        self.places
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store_places(&self, places: Vec<Place>) {
        *self.places.lock().unwrap_or_else(PoisonError::into_inner) = Some(places);
    }

    pub fn session(&self, id: i64) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn store_session(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id, session);
    }

    pub fn invalidate(&self) {
        *self.places.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        tracing::debug!("Catalog cache invalidated");
    }
}
