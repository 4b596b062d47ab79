// ── Directory fetcher ──
//
// Fetches one directory listing through a server's active connection and,
// for `/children` requests, enriches it with data from the parent item.
// Augmentations run as independent jobs on a bounded pool; the primary
// fetch waits for all of them (including chained ones queued while it
// waits) up to a hard ceiling, then merges whatever landed.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use plexlink_api::PlexHttp;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::convert::read_media_container;
use crate::error::CoreError;
use crate::lock::lock;
use crate::model::{DirectoryType, Listing, MediaKind};
use crate::registry::ServerRegistry;
use crate::url::PlexUrl;

/// Issues directory requests against registered servers.
///
/// Cheap to clone; clones share the augmentation worker pool.
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    http: PlexHttp,
    registry: ServerRegistry,
    pool: Arc<Semaphore>,
    ceiling: Duration,
}

impl DirectoryFetcher {
    /// `workers` bounds concurrent augmentation jobs; `ceiling` bounds how
    /// long a fetch waits for its augmentations.
    pub fn new(
        http: PlexHttp,
        registry: ServerRegistry,
        workers: usize,
        ceiling: Duration,
    ) -> Self {
        Self {
            http,
            registry,
            pool: Arc::new(Semaphore::new(workers.max(1))),
            ceiling,
        }
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    /// A fresh fetch handle (own body, own cancellation).
    pub fn directory(&self) -> PlexDirectory {
        PlexDirectory::new(self.clone())
    }

    /// Fetch `url` with augmentation, without keeping a handle around.
    pub async fn get_directory(&self, url: &PlexUrl) -> Result<Listing, CoreError> {
        self.directory().get_directory(url).await
    }

    /// One request and conversion; no augmentation.
    pub async fn fetch_listing(
        &self,
        url: &PlexUrl,
        body: Option<&str>,
    ) -> Result<Listing, CoreError> {
        let server = self.registry.resolve(url)?;
        let target = server.build_url(url.path(), url.query())?;
        let root = self.http.fetch_document(target, body).await?;
        read_media_container(&root, url)
    }

    async fn run_augmentation(&self, url: &PlexUrl) -> Result<Listing, CoreError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| CoreError::Cancelled)?;
        self.fetch_listing(url, None).await
    }
}

// ── PlexDirectory ────────────────────────────────────────────────────

/// A cancellable directory fetch.
///
/// Once `cancel_directory` has been called the handle stays cancelled;
/// create a new one with `DirectoryFetcher::directory` for further fetches.
#[derive(Debug)]
pub struct PlexDirectory {
    fetcher: DirectoryFetcher,
    body: Option<String>,
    cancel: CancellationToken,
}

impl PlexDirectory {
    pub fn new(fetcher: DirectoryFetcher) -> Self {
        Self {
            fetcher,
            body: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Send `body` with the primary request, turning it into a POST.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.set_body(body);
        self
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.body = Some(body.into()).filter(|b: &String| !b.is_empty());
    }

    /// Token that cancels this fetch when triggered from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the primary transfer and every outstanding augmentation.
    pub fn cancel_directory(&self) {
        debug!("cancelling directory fetch");
        self.cancel.cancel();
    }

    /// Fetch and convert `url`, enriching `/children` listings from their
    /// parent. An augmentation that does not land in time is dropped; the
    /// listing is still returned.
    pub async fn get_directory(&self, url: &PlexUrl) -> Result<Listing, CoreError> {
        let started = Instant::now();
        debug!(%url, "fetching directory");

        let augmentations = Arc::new(Augmentations::new(self.cancel.child_token()));
        if let Some(parent) = url.augmentation_url() {
            spawn_augmentation(&self.fetcher, &augmentations, parent);
        }

        let fetched = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.fetcher.fetch_listing(url, self.body.as_deref()) => result,
        };
        let mut listing = match fetched {
            Ok(listing) => listing,
            Err(e) => {
                warn!(%url, error = %e, "directory fetch failed");
                augmentations.cancel();
                return Err(e);
            }
        };

        if augmentations.was_used() {
            debug!(%url, "waiting for augmentation");
            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                landed = augmentations.wait(self.fetcher.ceiling) => Some(landed),
            };
            match outcome {
                None => {
                    augmentations.cancel();
                    return Err(CoreError::Cancelled);
                }
                Some(true) => {
                    let lists = augmentations.take();
                    let merged = lists
                        .iter()
                        .filter(|aug| merge_augmentation(&mut listing, aug))
                        .count();
                    debug!(%url, received = lists.len(), merged, "augmentation merged");
                }
                Some(false) => {
                    warn!(%url, "augmentation timed out, returning listing unenriched");
                    augmentations.cancel();
                }
            }
        }

        info!(
            %url,
            elapsed_ms = started.elapsed().as_millis(),
            entries = listing.len(),
            content = listing.content.as_deref().unwrap_or("none"),
            "returning directory"
        );
        Ok(listing)
    }
}

// ── Augmentation jobs ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct AugmentationState {
    started: usize,
    outstanding: usize,
    lists: Vec<Listing>,
}

/// Bookkeeping for the augmentation jobs of one fetch.
#[derive(Debug)]
struct Augmentations {
    state: Mutex<AugmentationState>,
    done: Notify,
    cancel: CancellationToken,
}

impl Augmentations {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            state: Mutex::new(AugmentationState::default()),
            done: Notify::new(),
            cancel,
        }
    }

    fn begin(&self) {
        let mut state = lock(&self.state);
        state.started += 1;
        state.outstanding += 1;
    }

    /// Record a finished job. A chained job must be begun before the job
    /// that spawned it finishes, so the count never dips to zero early.
    fn finish(&self, listing: Option<Listing>) {
        let mut state = lock(&self.state);
        if let Some(listing) = listing {
            state.lists.push(listing);
        }
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.done.notify_waiters();
        }
    }

    fn was_used(&self) -> bool {
        lock(&self.state).started > 0
    }

    fn take(&self) -> Vec<Listing> {
        std::mem::take(&mut lock(&self.state).lists)
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until no job is outstanding. Returns `false` on timeout.
    async fn wait(&self, ceiling: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + ceiling;
        loop {
            let mut notified = std::pin::pin!(self.done.notified());
            notified.as_mut().enable();

            if lock(&self.state).outstanding == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

fn spawn_augmentation(fetcher: &DirectoryFetcher, set: &Arc<Augmentations>, url: PlexUrl) {
    set.begin();
    debug!(%url, "queueing augmentation");

    let fetcher = fetcher.clone();
    let set = Arc::clone(set);
    tokio::spawn(async move {
        let result = tokio::select! {
            biased;
            () = set.cancel.cancelled() => None,
            result = fetcher.run_augmentation(&url) => Some(result),
        };

        match result {
            Some(Ok(listing)) => {
                if let Some(next) = chained_augmentation(&listing) {
                    spawn_augmentation(&fetcher, &set, next);
                }
                set.finish(Some(listing));
            }
            Some(Err(e)) => {
                debug!(%url, error = %e, "augmentation failed");
                set.finish(None);
            }
            None => {
                debug!(%url, "augmentation cancelled");
                set.finish(None);
            }
        }
    });
}

/// A season listing whose first entry names a parent leads one level up.
fn chained_augmentation(listing: &Listing) -> Option<PlexUrl> {
    if listing.directory_type != DirectoryType::Season {
        return None;
    }
    let parent = listing.first()?.properties.text("parentKey")?;
    PlexUrl::parse(parent).ok()
}

// ── Merge ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStrategy {
    /// Season or episode listing enriched from its show.
    ShowDetails,
    /// Artist listing enriched from the artist item.
    ArtistDetails,
}

impl MergeStrategy {
    fn media_kind(self) -> MediaKind {
        match self {
            Self::ShowDetails => MediaKind::Video,
            Self::ArtistDetails => MediaKind::Music,
        }
    }
}

fn merge_strategy(primary: DirectoryType, augmentation: DirectoryType) -> Option<MergeStrategy> {
    match (primary, augmentation) {
        (DirectoryType::Season | DirectoryType::Episode, DirectoryType::Show) => {
            Some(MergeStrategy::ShowDetails)
        }
        (DirectoryType::Artist, _) => Some(MergeStrategy::ArtistDetails),
        _ => None,
    }
}

/// Merge the first entry of `augmentation` into `listing`.
///
/// Absent properties are copied (present ones never overwritten), artwork
/// roles are unioned, and genres are appended. Returns `false` when the
/// type pair has no merge rule.
fn merge_augmentation(listing: &mut Listing, augmentation: &Listing) -> bool {
    let Some(source) = augmentation.first() else {
        return false;
    };
    let Some(strategy) = merge_strategy(listing.directory_type, source.directory_type) else {
        return false;
    };

    listing.properties.fill_absent_from(&source.properties);
    listing.art.union_with(&source.art);

    let kind = strategy.media_kind();
    if let (Some(target), Some(from)) = (listing.media.as_mut(), source.media.as_ref()) {
        if target.kind == kind && from.kind == kind {
            target.genres.extend(from.genres.iter().cloned());
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{ArtRole, Entry, MediaRecord};

    fn listing(kind: DirectoryType, entries: Vec<Entry>) -> Listing {
        Listing {
            directory_type: kind,
            media: kind.media_kind().map(MediaRecord::new),
            entries,
            ..Listing::default()
        }
    }

    fn show_entry() -> Entry {
        let mut entry = Entry {
            directory_type: DirectoryType::Show,
            media: Some(MediaRecord {
                kind: MediaKind::Video,
                genres: vec!["Drama".into()],
            }),
            ..Entry::default()
        };
        entry.properties.insert("title", "Y");
        entry.properties.insert("summary", "A show");
        entry.art.set(ArtRole::Fanart, "fan");
        entry.art.set(ArtRole::Thumb, "show-thumb");
        entry
    }

    #[test]
    fn show_details_fill_season_listing() {
        let mut primary = listing(DirectoryType::Season, vec![]);
        primary.properties.insert("title", "X");
        primary.art.set(ArtRole::Thumb, "season-thumb");
        primary.media.as_mut().unwrap().genres.push("Crime".into());

        let aug = listing(DirectoryType::Show, vec![show_entry()]);
        assert!(merge_augmentation(&mut primary, &aug));

        assert_eq!(primary.properties.text("title"), Some("X"));
        assert_eq!(primary.properties.text("summary"), Some("A show"));
        assert_eq!(primary.art.get(ArtRole::Thumb), Some("season-thumb"));
        assert_eq!(primary.art.get(ArtRole::Fanart), Some("fan"));
        assert_eq!(
            primary.media.unwrap().genres,
            vec!["Crime".to_owned(), "Drama".to_owned()]
        );
    }

    #[test]
    fn unrelated_types_are_not_merged() {
        let mut primary = listing(DirectoryType::Movie, vec![]);
        let aug = listing(DirectoryType::Show, vec![show_entry()]);
        assert!(!merge_augmentation(&mut primary, &aug));
        assert!(primary.properties.is_empty());
    }

    #[test]
    fn season_augmentation_of_episodes_is_skipped() {
        let mut primary = listing(DirectoryType::Episode, vec![]);
        let season = Entry {
            directory_type: DirectoryType::Season,
            ..Entry::default()
        };
        let aug = listing(DirectoryType::Season, vec![season]);
        assert!(!merge_augmentation(&mut primary, &aug));
    }

    #[test]
    fn empty_augmentation_is_ignored() {
        let mut primary = listing(DirectoryType::Artist, vec![]);
        assert!(!merge_augmentation(&mut primary, &listing(DirectoryType::Artist, vec![])));
    }

    #[test]
    fn season_with_parent_key_chains() {
        let mut season = Entry {
            directory_type: DirectoryType::Season,
            ..Entry::default()
        };
        season
            .properties
            .insert("parentKey", "plexserver://abc/library/metadata/5");
        let aug = listing(DirectoryType::Season, vec![season]);

        assert_eq!(
            chained_augmentation(&aug).unwrap().as_str(),
            "plexserver://abc/library/metadata/5"
        );
        assert!(chained_augmentation(&listing(DirectoryType::Show, vec![show_entry()])).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_tolerates_growing_job_set() {
        let set = Arc::new(Augmentations::new(CancellationToken::new()));
        set.begin();

        let worker = Arc::clone(&set);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            worker.begin();
            worker.finish(None);
            tokio::time::sleep(Duration::from_secs(1)).await;
            worker.finish(Some(Listing::default()));
        });

        assert!(set.wait(Duration::from_secs(5)).await);
        assert_eq!(set.take().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_at_ceiling() {
        let set = Augmentations::new(CancellationToken::new());
        set.begin();
        assert!(!set.wait(Duration::from_secs(5)).await);
    }
}
