//! The intake pipeline and the per-event error boundary.
//!
//! ```text
//! created ─▶ stabilize ─▶ extract ─▶ rename ─▶ organize ─▶ hash + ledger
//!               │            │          │          │             │
//!               └────────────┴──────────┴──────────┴─────────────┴──▶ event log
//! ```
//!
//! Each run carries its own [`FileContext`]; nothing about the file being
//! processed lives on the pipeline itself, so workers can share one
//! `Arc<Pipeline>`.

use crate::capability::{BarcodeDecoder, PageRenderer};
use crate::config::DocketConfig;
use crate::error::{DocketError, Result};
use crate::event_log::EventLog;
use crate::extractor::{Token, TokenExtractor};
use crate::ledger::{self, HashLedger, SharedLedger};
use crate::lock::try_lock_session;
use crate::organizer::{OrganizeOutcome, Organizer};
use crate::poppler::PopplerRenderer;
use crate::renamer::{self, RenameOutcome};
use crate::stabilizer::{Stability, Stabilizer};
use crate::watcher::{WatchEvent, WatchEventKind};
use crate::zbar::ZbarDecoder;
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard};
use tracing::{debug, error, info_span};

/// Everything known about one document during one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContext {
    /// Path the creation event reported.
    pub source: PathBuf,
    /// Where the document is now.
    pub current: PathBuf,
    pub stability: Stability,
    pub token: Option<Token>,
    /// Set once the document sits in its organized destination.
    pub organized: Option<PathBuf>,
    pub digest: Option<String>,
}

impl FileContext {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        Self {
            current: source.clone(),
            source,
            stability: Stability::Unknown,
            token: None,
            organized: None,
            digest: None,
        }
    }

    fn with_stability(self, stability: Stability) -> Self {
        Self { stability, ..self }
    }

    fn with_token(self, token: Option<Token>) -> Self {
        Self { token, ..self }
    }

    fn moved_to(self, current: PathBuf) -> Self {
        Self { current, ..self }
    }

    fn with_organized(self, organized: Option<PathBuf>) -> Self {
        Self { organized, ..self }
    }

    fn with_digest(self, digest: Option<String>) -> Self {
        Self { digest, ..self }
    }

    /// True if the document currently carries `<token>.pdf` as its name.
    fn has_canonical_name(&self) -> bool {
        let Some(token) = &self.token else {
            return false;
        };
        self.current
            .file_name()
            .and_then(|n| n.to_str())
            .map(|name| name == renamer::canonical_name(&token.value))
            .unwrap_or(false)
    }
}

pub struct Pipeline {
    config: DocketConfig,
    stabilizer: Stabilizer,
    extractor: TokenExtractor,
    organizer: Organizer,
    ledger: SharedLedger,
    events: EventLog,
}

impl Pipeline {
    /// Pipeline over the poppler renderer and zbar decoder named in `config`.
    pub fn from_config(config: &DocketConfig, organize_root: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            config,
            organize_root,
            Arc::new(PopplerRenderer::from_tools(&config.tools)),
            Arc::new(ZbarDecoder::from_tools(&config.tools)),
        )
    }

    /// Pipeline over explicit capabilities. Loads the ledger.
    pub fn new(
        config: &DocketConfig,
        organize_root: impl Into<PathBuf>,
        renderer: Arc<dyn PageRenderer>,
        decoder: Arc<dyn BarcodeDecoder>,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = HashLedger::load(&config.ledger_path)?;
        Ok(Self {
            config: config.clone(),
            stabilizer: Stabilizer::from_policy(config.stabilizer),
            extractor: TokenExtractor::new(renderer, decoder, config.dpi, config.open_retry),
            organizer: Organizer::new(organize_root),
            ledger: ledger.into_shared(),
            events: EventLog::new(&config.log_path),
        })
    }

    pub fn config(&self) -> &DocketConfig {
        &self.config
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Whether the watch loop should hand this event to a worker at all.
    pub fn accepts(&self, event: &WatchEvent) -> bool {
        if event.is_directory {
            return false;
        }
        if self.config.is_ignored(&event.path) || self.is_own_file(&event.path) {
            return false;
        }
        match &event.dest_path {
            Some(dest) => !self.config.is_ignored(dest),
            None => true,
        }
    }

    /// The ledger and event log may live under the watched root; their own
    /// writes must not feed back into the pipeline.
    fn is_own_file(&self, path: &Path) -> bool {
        let key = ledger::ledger_key(path);
        key == ledger::ledger_key(&self.config.ledger_path)
            || key == ledger::ledger_key(&self.config.log_path)
    }

    /// Per-event boundary: nothing returned from here can stop the watch loop.
    pub fn handle(&self, event: &WatchEvent) {
        if !self.accepts(event) {
            debug!(path = %event.path.display(), kind = ?event.kind, "Ignoring event");
            return;
        }
        let span = info_span!("event", kind = ?event.kind, path = %event.path.display());
        let _enter = span.enter();

        let result = match event.kind {
            WatchEventKind::Created => self.on_created(&event.path).map(|_| ()),
            WatchEventKind::Modified => self.on_modified(&event.path),
            WatchEventKind::Deleted => self.on_deleted(&event.path),
            WatchEventKind::Moved => match &event.dest_path {
                Some(dest) => self.on_moved(&event.path, dest),
                None => Err(DocketError::InvalidState(
                    "moved event without destination".to_string(),
                )),
            },
        };

        if let Err(e) = result {
            error!(error = %e, "Event processing failed");
            self.events
                .record(format!("Error processing {}: {}", event.path.display(), e));
        }
    }

    /// Single-file mode: run intake on `path` and report errors to the log.
    pub fn process_file(&self, path: &Path) -> Option<FileContext> {
        let span = info_span!("process", path = %path.display());
        let _enter = span.enter();
        match self.intake(FileContext::new(path)) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                error!(error = %e, "Processing failed");
                self.events
                    .record(format!("Error processing {}: {}", path.display(), e));
                None
            }
        }
    }

    /// Single-file mode outside a watch session. The session lock is held
    /// for the run, so a watcher sharing the ledger is refused rather than
    /// later persisting a map without this run's entry.
    pub fn process_exclusive(&self, path: &Path) -> Result<Option<FileContext>> {
        let _lock = try_lock_session(&self.config.ledger_path)?;
        self.reload_ledger()?;
        Ok(self.process_file(path))
    }

    /// Replace the in-memory ledger with what is on disk. Called once the
    /// session lock is held, since another process may have written it
    /// since this pipeline was built.
    pub(crate) fn reload_ledger(&self) -> Result<()> {
        let fresh = HashLedger::load(&self.config.ledger_path)?;
        *self.lock_ledger()? = fresh;
        Ok(())
    }

    fn on_created(&self, path: &Path) -> Result<Option<FileContext>> {
        if !self.config.is_document(path) {
            debug!("Not a document, skipping intake");
            return Ok(None);
        }
        self.intake(FileContext::new(path)).map(Some)
    }

    /// The full intake run for one document.
    pub fn intake(&self, ctx: FileContext) -> Result<FileContext> {
        let ctx = self.stabilize(ctx);
        if ctx.stability != Stability::Stable {
            self.events.record(format!(
                "File not stable, skipped: {}",
                ctx.current.display()
            ));
            return Ok(ctx);
        }

        let ctx = self.extract(ctx)?;
        let ctx = self.rename(ctx)?;
        let ctx = self.organize(ctx)?;
        let ctx = self.record(ctx)?;
        Ok(ctx)
    }

    fn stabilize(&self, ctx: FileContext) -> FileContext {
        let stability = self.stabilizer.wait(&ctx.current);
        ctx.with_stability(stability)
    }

    fn extract(&self, ctx: FileContext) -> Result<FileContext> {
        let extraction = self.extractor.scan(&ctx.current)?;
        for failure in &extraction.page_errors {
            self.events.record(format!(
                "Error processing page {} of {}: {}",
                failure.page + 1,
                ctx.current.display(),
                failure.error
            ));
        }
        if let Some(token) = &extraction.token {
            self.events.record(format!(
                "Page {}: Found barcode {} in {}",
                token.page + 1,
                token.value,
                ctx.current.display()
            ));
        }
        Ok(ctx.with_token(extraction.token))
    }

    fn rename(&self, ctx: FileContext) -> Result<FileContext> {
        let token = ctx.token.as_ref().map(|t| t.value.as_str());
        let outcome = renamer::rename(&ctx.current, token)?;
        match &outcome {
            RenameOutcome::Renamed { from, to } => {
                self.events.record(format!(
                    "File renamed: {} -> {}",
                    from.display(),
                    to.display()
                ));
            }
            RenameOutcome::NameExists { path, existing } if path == existing => {
                debug!("Document already carries its canonical name");
            }
            RenameOutcome::NameExists { path, existing } => {
                self.events.record(format!(
                    "File with name {} already exists, skipped rename: {}",
                    existing.display(),
                    path.display()
                ));
            }
            RenameOutcome::NoToken { path } => {
                self.events
                    .record(format!("No token found in file: {}", path.display()));
            }
            RenameOutcome::UnsafeToken { path, token } => {
                self.events.record(format!(
                    "Token {:?} is not a usable file name, skipped rename: {}",
                    token,
                    path.display()
                ));
            }
        }
        let current = outcome.path().to_path_buf();
        Ok(ctx.moved_to(current))
    }

    fn organize(&self, ctx: FileContext) -> Result<FileContext> {
        if !ctx.has_canonical_name() {
            return Ok(ctx);
        }
        let outcome = self.organizer.organize(&ctx.current)?;
        match &outcome {
            OrganizeOutcome::Moved { from, to } => {
                self.events.record(format!(
                    "File organized: {} -> {}",
                    from.display(),
                    to.display()
                ));
            }
            OrganizeOutcome::InPlace { path } => {
                self.events
                    .record(format!("File already organized: {}", path.display()));
            }
            OrganizeOutcome::DestinationTaken { path, destination } => {
                self.events.record(format!(
                    "Failed to organize {}: destination {} already exists",
                    path.display(),
                    destination.display()
                ));
            }
            OrganizeOutcome::Unplannable { path } => {
                self.events.record(format!(
                    "Failed to organize {}: name has no form id and month",
                    path.display()
                ));
            }
        }
        let organized = outcome.destination().map(Path::to_path_buf);
        let current = outcome.path().to_path_buf();
        Ok(ctx.moved_to(current).with_organized(organized))
    }

    fn record(&self, ctx: FileContext) -> Result<FileContext> {
        let digest = {
            let mut ledger = self.lock_ledger()?;
            ledger.record_final(Some(&ctx.source), &ctx.current)?
        };
        match &digest {
            Some(digest) => self.events.record(format!(
                "File created and processed: {} (Hash: {})",
                ctx.current.display(),
                digest
            )),
            None => self.events.record(format!(
                "Could not hash {}, ledger not updated",
                ctx.current.display()
            )),
        }
        Ok(ctx.with_digest(digest))
    }

    fn on_modified(&self, path: &Path) -> Result<()> {
        let tracked = self.lock_ledger()?.get(path).map(str::to_string);
        match tracked {
            Some(old) => self.rehash(path, old),
            None => self.adopt(path),
        }
    }

    fn rehash(&self, path: &Path, old: String) -> Result<()> {
        let new = match ledger::hash_file(path) {
            Ok(digest) => digest,
            Err(e) => {
                debug!(error = %e, "Modified file unreadable, keeping ledger entry");
                return Ok(());
            }
        };
        if new == old {
            self.events.record(format!(
                "File modified: {} (No changes detected) (Hash: {})",
                path.display(),
                new
            ));
        } else {
            self.lock_ledger()?.upsert(path, new.clone())?;
            self.events.record(format!(
                "File modified: {} (Hash changed) (Old: {} New: {})",
                path.display(),
                old,
                new
            ));
        }
        Ok(())
    }

    /// An untracked document changed: once it is stable, start tracking it.
    /// Covers documents whose intake was aborted before the ledger step.
    fn adopt(&self, path: &Path) -> Result<()> {
        if !self.config.is_document(path) {
            return Ok(());
        }
        if self.stabilizer.wait(path) != Stability::Stable {
            debug!("Modified untracked file not stable, leaving untracked");
            return Ok(());
        }
        let digest = self.lock_ledger()?.record(path)?;
        if let Some(digest) = digest {
            self.events.record(format!(
                "File modified: {} (Newly added hash: {})",
                path.display(),
                digest
            ));
        }
        Ok(())
    }

    fn on_deleted(&self, path: &Path) -> Result<()> {
        let removed = self.lock_ledger()?.remove(path)?;
        if let Some(digest) = removed {
            self.events.record(format!(
                "File deleted: {} (Hash: {})",
                path.display(),
                digest
            ));
        }
        Ok(())
    }

    fn on_moved(&self, from: &Path, to: &Path) -> Result<()> {
        let retained = self.lock_ledger()?.relocate(from, to)?;
        match retained {
            Some(digest) => self.events.record(format!(
                "File moved: {} -> {} (Hash retained: {})",
                from.display(),
                to.display(),
                digest
            )),
            None => self.events.record(format!(
                "File moved (untracked): {} -> {}",
                from.display(),
                to.display()
            )),
        }
        Ok(())
    }

    /// Final flush at shutdown.
    pub fn flush(&self) -> Result<()> {
        self.lock_ledger()?.persist()?;
        Ok(())
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, HashLedger>> {
        self.ledger
            .lock()
            .map_err(|_| DocketError::InvalidState("ledger lock poisoned".to_string()))
    }
}
