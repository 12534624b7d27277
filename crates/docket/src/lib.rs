//! Docket - barcode-driven intake for scanned documents
//!
//! Watches a folder for new PDFs, reads the identifying barcode, renames the
//! document after it, files it under `<form_id>/<year>-<month>/` and keeps a
//! SHA-256 ledger of everything it has touched.

pub mod capability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_log;
pub mod extractor;
pub mod ledger;
pub mod lock;
pub mod organizer;
pub mod pipeline;
pub mod planner;
pub mod poppler;
pub mod renamer;
pub mod session;
pub mod stabilizer;
pub mod watcher;
pub mod zbar;

pub use capability::{Barcode, BarcodeDecoder, PageImage, PageRenderer};
pub use config::{DocketConfig, RetryPolicy, ToolPaths};
pub use error::{DocketError, Result};
pub use event_log::EventLog;
pub use extractor::{Token, TokenExtractor};
pub use ledger::{HashLedger, SharedLedger};
pub use organizer::{OrganizeOutcome, Organizer};
pub use pipeline::{FileContext, Pipeline};
pub use planner::{plan, Plan};
pub use renamer::RenameOutcome;
pub use session::{SessionState, ShutdownToken, WatchSession};
pub use stabilizer::{Stability, Stabilizer};
pub use watcher::{WatchEvent, WatchEventKind};
