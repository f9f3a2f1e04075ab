//! Regulated document control: content-addressed versions, attribute-based
//! permissions and approval workflows over a sled ledger.

pub mod approval;
pub mod audit;
pub mod blob;
pub mod config;
pub mod directory;
pub mod document;
pub mod engine;
pub mod error;
pub mod indexer;
pub mod lifecycle;
pub mod permission;
pub mod store;
pub mod utils;
pub mod version;
pub mod versioning;
pub mod workflow;

pub use approval::{ApprovalInstance, ApprovalStatus, Decision};
pub use config::Config;
pub use directory::{Directory, Principal, StaticDirectory};
pub use document::{ConfidentialityLevel, Document, DocumentStatus, NewDocument};
pub use engine::ApprovalEngine;
pub use error::{DocumentError, Result};
pub use lifecycle::DocumentControl;
pub use permission::{Action, PermissionEvaluator};
pub use version::{DocumentVersion, FileInfo, VersionNumber, VersionType};
pub use versioning::VersionStore;
