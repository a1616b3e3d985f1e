//! Tag-based invalidation registry.
//!
//! A tag is an opaque string naming a group of live queries that should
//! refresh together after a related write. Queries register a refresh
//! callback under their tag; mutations invalidate tags on success.
//!
//! Each tag holds one callback per subscriber, so any number of queries
//! can share a tag and all of them refresh on invalidation. A subscriber
//! that registers again under the same tag replaces its own callback.
//! Registrations are removed when their [`TagRegistration`] guard drops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, trace};

/// Zero-argument refresh callback.
pub type RefreshFn = Arc<dyn Fn() + Send + Sync>;

type Entries = DashMap<String, Vec<Entry>>;

static NEXT_SUBSCRIBER: AtomicU64 = AtomicU64::new(1);
static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one registry subscriber (usually one query binding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocates a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIBER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One tag or an ordered list of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags(Vec<String>);

impl Tags {
    #[must_use]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Tags {
    fn from(tag: &str) -> Self {
        Self(vec![tag.to_string()])
    }
}

impl From<String> for Tags {
    fn from(tag: String) -> Self {
        Self(vec![tag])
    }
}

impl From<Vec<String>> for Tags {
    fn from(tags: Vec<String>) -> Self {
        Self(tags)
    }
}

impl From<Vec<&str>> for Tags {
    fn from(tags: Vec<&str>) -> Self {
        tags.as_slice().into()
    }
}

impl From<&[&str]> for Tags {
    fn from(tags: &[&str]) -> Self {
        Self(tags.iter().map(ToString::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Tags {
    fn from(tags: [&str; N]) -> Self {
        tags.as_slice().into()
    }
}

impl<const N: usize> From<[String; N]> for Tags {
    fn from(tags: [String; N]) -> Self {
        Self(tags.into())
    }
}

impl FromIterator<String> for Tags {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

struct Entry {
    subscriber: SubscriberId,
    registration: u64,
    callback: RefreshFn,
}

/// Process-wide map from tag to refresh callbacks.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone, Default)]
pub struct TagRegistry {
    entries: Arc<Entries>,
}

impl std::fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for item in self.entries.iter() {
            map.entry(item.key(), &item.value().len());
        }
        map.finish()
    }
}

impl TagRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `subscriber` under `tag`, replacing any
    /// callback the same subscriber registered there before.
    ///
    /// The registration lives until the returned guard is dropped.
    #[must_use = "dropping the registration unregisters the callback"]
    pub fn provide_tag<F>(
        &self,
        tag: impl Into<String>,
        subscriber: SubscriberId,
        callback: F,
    ) -> TagRegistration
    where
        F: Fn() + Send + Sync + 'static,
    {
        let tag = tag.into();
        let registration = NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed);
        let callback: RefreshFn = Arc::new(callback);

        {
            let mut list = self.entries.entry(tag.clone()).or_default();
            match list.iter_mut().find(|e| e.subscriber == subscriber) {
                Some(existing) => {
                    existing.registration = registration;
                    existing.callback = callback;
                }
                None => list.push(Entry {
                    subscriber,
                    registration,
                    callback,
                }),
            }
        }

        trace!(tag = %tag, ?subscriber, "tag provided");

        TagRegistration {
            tag,
            subscriber,
            registration,
            entries: Arc::downgrade(&self.entries),
        }
    }

    /// Invokes every callback registered under each of `tags`, in the order
    /// the tags are given. Unknown tags are ignored.
    ///
    /// Callbacks are fire-and-forget; this returns the number invoked.
    pub fn invalidate_tags(&self, tags: impl Into<Tags>) -> usize {
        let tags = tags.into();
        let mut invoked = 0;

        for tag in tags.iter() {
            // Snapshot so callbacks can re-register without holding the shard lock.
            let callbacks: Vec<RefreshFn> = self
                .entries
                .get(tag)
                .map(|list| list.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default();

            if callbacks.is_empty() {
                trace!(tag, "invalidated tag has no subscribers");
                continue;
            }

            debug!(tag, subscribers = callbacks.len(), "invalidating tag");
            for callback in callbacks {
                callback();
                invoked += 1;
            }
        }

        invoked
    }

    /// Returns the number of live subscribers under `tag`.
    #[must_use]
    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.entries.get(tag).map_or(0, |list| list.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Guard returned by [`TagRegistry::provide_tag`]; removes its callback
/// when dropped.
#[derive(Debug)]
pub struct TagRegistration {
    tag: String,
    subscriber: SubscriberId,
    registration: u64,
    entries: Weak<Entries>,
}

impl TagRegistration {
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    #[must_use]
    pub const fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }
}

impl Drop for TagRegistration {
    fn drop(&mut self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };

        let now_empty = match entries.get_mut(&self.tag) {
            Some(mut list) => {
                // A newer registration by the same subscriber stays in place.
                list.retain(|e| {
                    e.subscriber != self.subscriber || e.registration != self.registration
                });
                list.is_empty()
            }
            None => false,
        };

        if now_empty {
            entries.remove_if(&self.tag, |_, list| list.is_empty());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = count.clone();
        (count, move || {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_tags_normalization() {
        assert_eq!(Tags::from("my-finds").len(), 1);
        assert_eq!(
            Tags::from(["my-finds", "all-finds"])
                .iter()
                .collect::<Vec<_>>(),
            vec!["my-finds", "all-finds"]
        );
        assert_eq!(Tags::from(format!("find-{}", 7)).iter().next(), Some("find-7"));
        assert!(Tags::none().is_empty());
    }

    #[test]
    fn test_invalidate_invokes_registered_callback() {
        let registry = TagRegistry::new();
        let (count, callback) = counter();
        let _reg = registry.provide_tag("my-finds", SubscriberId::next(), callback);

        assert_eq!(registry.invalidate_tags("my-finds"), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_tags_are_ignored() {
        let registry = TagRegistry::new();
        let (count, callback) = counter();
        let _reg = registry.provide_tag("my-finds", SubscriberId::next(), callback);

        assert_eq!(registry.invalidate_tags(["user-search", "all-finds"]), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_same_subscriber_overwrites() {
        let registry = TagRegistry::new();
        let subscriber = SubscriberId::next();
        let (first, first_cb) = counter();
        let (second, second_cb) = counter();

        let _old = registry.provide_tag("user-search", subscriber, first_cb);
        let _new = registry.provide_tag("user-search", subscriber, second_cb);

        assert_eq!(registry.subscriber_count("user-search"), 1);
        registry.invalidate_tags("user-search");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_subscribers_share_tag() {
        let registry = TagRegistry::new();
        let (a, a_cb) = counter();
        let (b, b_cb) = counter();

        let _a = registry.provide_tag("my-finds", SubscriberId::next(), a_cb);
        let _b = registry.provide_tag("my-finds", SubscriberId::next(), b_cb);

        assert_eq!(registry.invalidate_tags(vec!["my-finds"]), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let registry = TagRegistry::new();
        let (count, callback) = counter();
        let reg = registry.provide_tag("all-finds", SubscriberId::next(), callback);
        assert_eq!(reg.tag(), "all-finds");

        drop(reg);
        assert_eq!(registry.subscriber_count("all-finds"), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.invalidate_tags("all-finds"), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropping_superseded_registration_keeps_newer() {
        let registry = TagRegistry::new();
        let subscriber = SubscriberId::next();
        let (count, callback) = counter();

        let old = registry.provide_tag("user-search", subscriber, || {});
        let _new = registry.provide_tag("user-search", subscriber, callback);
        drop(old);

        assert_eq!(registry.subscriber_count("user-search"), 1);
        registry.invalidate_tags("user-search");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_reregister() {
        let registry = TagRegistry::new();
        let inner = registry.clone();
        let subscriber = SubscriberId::next();

        let _reg = registry.provide_tag("my-finds", subscriber, move || {
            // Leak the guard so the replacement outlives the callback.
            std::mem::forget(inner.provide_tag("my-finds", subscriber, || {}));
        });

        assert_eq!(registry.invalidate_tags("my-finds"), 1);
        assert_eq!(registry.subscriber_count("my-finds"), 1);
    }

    #[test]
    fn test_invalidation_order_follows_tags() {
        use std::sync::Mutex;

        let registry = TagRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let regs: Vec<_> = ["find-1", "my-finds", "all-finds"]
            .into_iter()
            .map(|tag| {
                let order = order.clone();
                registry.provide_tag(tag, SubscriberId::next(), move || {
                    order.lock().expect("lock").push(tag);
                })
            })
            .collect();

        registry.invalidate_tags(["all-finds", "find-1", "my-finds"]);
        assert_eq!(
            *order.lock().expect("lock"),
            vec!["all-finds", "find-1", "my-finds"]
        );
        drop(regs);
    }
}
