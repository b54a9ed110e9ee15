use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const VOLATILE_PREFIX: &str = "blob:";
pub const DURABLE_PREFIX: &str = "data:";

// In-memory image bytes behind a volatile handle
#[derive(Debug, Clone)]
pub struct PreviewBlob {
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Session-local preview handles (`blob:<uuid>`). Handles never survive a
/// reload; whoever allocates one must release it on removal or teardown.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    blobs: DashMap<String, PreviewBlob>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, mime_type: &str, bytes: &[u8]) -> String {
        let handle = format!("{}{}", VOLATILE_PREFIX, Uuid::new_v4());
        self.blobs.insert(
            handle.clone(),
            PreviewBlob {
                mime_type: mime_type.to_string(),
                bytes: Arc::from(bytes),
            },
        );
        log::debug!("Allocated preview handle {} ({} bytes)", handle, bytes.len());
        handle
    }

    pub fn resolve(&self, handle: &str) -> Option<PreviewBlob> {
        self.blobs.get(handle).map(|entry| entry.value().clone())
    }

    /// Returns whether the handle was live.
    pub fn release(&self, handle: &str) -> bool {
        let released = self.blobs.remove(handle).is_some();
        if released {
            log::debug!("Released preview handle {}", handle);
        }
        released
    }

    pub fn release_all<'a>(&self, handles: impl IntoIterator<Item = &'a str>) -> usize {
        handles.into_iter().filter(|h| self.release(h)).count()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

pub fn is_volatile(preview_ref: &str) -> bool {
    preview_ref.starts_with(VOLATILE_PREFIX)
}

pub fn data_uri(mime_type: &str, base64_data: &str) -> String {
    format!("{}{};base64,{}", DURABLE_PREFIX, mime_type, base64_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_resolve_release() {
        let registry = PreviewRegistry::new();
        let handle = registry.allocate("image/png", &[1, 2, 3]);
        assert!(is_volatile(&handle));
        assert_eq!(registry.len(), 1);

        let blob = registry.resolve(&handle).unwrap();
        assert_eq!(blob.mime_type, "image/png");
        assert_eq!(&*blob.bytes, &[1, 2, 3]);

        assert!(registry.release(&handle));
        assert!(!registry.release(&handle));
        assert!(registry.resolve(&handle).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_all_counts_live_handles() {
        let registry = PreviewRegistry::new();
        let a = registry.allocate("image/png", b"a");
        let b = registry.allocate("image/jpeg", b"b");
        let released = registry.release_all([a.as_str(), b.as_str(), "blob:gone"]);
        assert_eq!(released, 2);
    }

    #[test]
    fn test_data_uri_is_durable() {
        let uri = data_uri("image/png", "AAAA");
        assert_eq!(uri, "data:image/png;base64,AAAA");
        assert!(!is_volatile(&uri));
    }
}
