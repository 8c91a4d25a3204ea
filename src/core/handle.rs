//! Display handles for generated outputs.
//!
//! A viewer does not hold on to encoded bytes directly; it asks the handle
//! table for a short-lived reference it can render from. Handles must be
//! released explicitly, otherwise the table keeps the bytes alive.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

type HandleMap = Mutex<HashMap<Uuid, HandleEntry>>;

struct HandleEntry {
    bytes: Arc<[u8]>,
    mime_type: &'static str,
}

/// Table of live display handles.
///
/// Cloning the table shares it.
#[derive(Clone, Default)]
pub struct DisplayHandles {
    entries: Arc<HandleMap>,
}

/// A transient reference to one generated blob.
#[derive(Clone)]
pub struct DisplayHandle {
    id: Uuid,
    mime_type: &'static str,
    table: Weak<HandleMap>,
}

impl DisplayHandles {
    /// Create an empty handle table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes for display and return their handle.
    pub fn create(&self, bytes: Arc<[u8]>, mime_type: &'static str) -> DisplayHandle {
        let id = Uuid::new_v4();
        self.entries.lock().insert(id, HandleEntry { bytes, mime_type });
        DisplayHandle {
            id,
            mime_type,
            table: Arc::downgrade(&self.entries),
        }
    }

    /// Look up the bytes behind a handle, if it is still live.
    pub fn resolve(&self, handle: &DisplayHandle) -> Option<Arc<[u8]>> {
        self.entries.lock().get(&handle.id).map(|e| Arc::clone(&e.bytes))
    }

    /// Render a handle as a `data:` URL for inline previews.
    pub fn data_url(&self, handle: &DisplayHandle) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(&handle.id)?;
        Some(format!(
            "data:{};base64,{}",
            entry.mime_type,
            BASE64.encode(&entry.bytes)
        ))
    }

    /// Release a handle. Returns false if it was already released.
    pub fn release(&self, handle: &DisplayHandle) -> bool {
        self.entries.lock().remove(&handle.id).is_some()
    }

    /// Release every handle in the list, returning how many were still live.
    pub fn release_all<'a>(&self, handles: impl IntoIterator<Item = &'a DisplayHandle>) -> usize {
        let mut entries = self.entries.lock();
        handles
            .into_iter()
            .filter(|h| entries.remove(&h.id).is_some())
            .count()
    }

    /// Number of handles not yet released.
    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Total bytes pinned by live handles.
    pub fn live_bytes(&self) -> usize {
        self.entries.lock().values().map(|e| e.bytes.len()).sum()
    }
}

impl fmt::Debug for DisplayHandles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandles")
            .field("live", &self.live_count())
            .finish()
    }
}

impl DisplayHandle {
    /// Handle identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// URL-style name a viewer can key on.
    pub fn url(&self) -> String {
        format!("blob:pixelsmith/{}", self.id)
    }

    /// MIME type of the referenced bytes.
    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Whether the handle can still be resolved.
    pub fn is_live(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| table.lock().contains_key(&self.id))
    }

    /// Release this handle. Safe to call any number of times.
    pub fn release(&self) -> bool {
        match self.table.upgrade() {
            Some(table) => table.lock().remove(&self.id).is_some(),
            None => false,
        }
    }
}

impl fmt::Debug for DisplayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayHandle")
            .field("url", &self.url())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl PartialEq for DisplayHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DisplayHandle {}
