//! # ibi recovery
//!
//! Recovers files and metadata from the SQLite catalog and file store of a
//! WD ibi personal cloud device, including units whose database is damaged
//! and only partially backed up.
//!
//! The catalog knows every file's name, album memberships, tags, capture
//! dates, and location; the store only knows opaque content ids. This crate
//! joins the two back together, then either copies the files into a
//! browsable tree or writes their metadata in formats photo tools import.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ index.db    │──▶│ SchemaReader│──▶│  Normalizer  │──▶│ Resolver │─┐
//! │ (primary)   │   │ (sqlx)      │   │ tags/albums  │   │ legacy + │ │
//! └─────────────┘   └─────────────┘   └──────────────┘   │ per-user │ │
//! ┌─────────────┐                                        └──────────┘ │
//! │ dbBackup/   │──▶ same path ──────────────────────────────────────▶ merge
//! │ index.db    │                                                      │
//! └─────────────┘                                                      ▼
//!                                        ┌────────────┬──────────┬──────────┐
//!                                        │  extract   │  export  │  audit   │
//!                                        │ copy tree  │ 12 fmts  │  report  │
//!                                        └────────────┴──────────┴──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ibirecover --root /mnt/ibi detect
//! ibirecover --root /mnt/ibi audit --report-dir ./reports
//! ibirecover --root /mnt/ibi extract ./recovered --mode albums --dedup
//! ibirecover --root /mnt/ibi export ./metadata --format xmp_sidecar
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`detect`] | Storage layout detection |
//! | [`db`] | Read-only database connections |
//! | [`schema`] | Schema-tolerant row streams |
//! | [`normalize`] | Rows to records, batched tag/album lookups |
//! | [`models`] | Core data types |
//! | [`resolver`] | Physical file location strategies |
//! | [`merge`] | Primary/backup reconciliation |
//! | [`pipeline`] | Load, resolve, and merge in one call |
//! | [`export`] | Declarative metadata export |
//! | [`extract`] | Bulk copy into album or type trees |
//! | [`audit`] | Verification report and orphan scan |

pub mod audit;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod export;
pub mod extract;
pub mod merge;
pub mod models;
pub mod naming;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod schema;
pub mod timestamps;
