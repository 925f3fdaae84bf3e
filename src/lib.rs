//! Packsmith — brief-to-repository generation pipeline.
//!
//! ## Overview
//!
//! A project brief (title, description, technologies) is submitted as a
//! job. The pipeline asks a planner model for a validated file plan,
//! partitions the planned files into ordered build modules, generates each
//! module's content with bounded self-repair, persists everything to a
//! SQLite ledger, and publishes the result to GitHub as a single atomic
//! commit on a freshly created repository — streaming progress events to
//! the submitter's callback the whole way.
//!
//! ## Module Map
//!
//! ```text
//!  orchestrator.rs  (Orchestrator::run_job — phase order, failure policy)
//!      │
//!      ├─ plan.rs       parse_plan()        planner output → validated Plan
//!      ├─ modules.rs    partition()         Plan → ordered BuildModules
//!      ├─ generator.rs  ModuleBuilder       CodeModel calls + one repair
//!      ├─ ledger.rs     LedgerHandle        jobs, briefs, generated files
//!      ├─ publisher.rs  publish()           GitHost blob/tree/commit/ref
//!      └─ progress.rs   ProgressSink        webhook / channel event fan-out
//! ```
//!
//! ## Supporting Modules
//!
//! | Module   | Responsibility                                        |
//! |----------|-------------------------------------------------------|
//! | `models` | Shared types: `Job`, `Plan`, `FileTask`, `RemoteRepo` |
//! | `errors` | `PlanError`, `PublishError`, `PipelineError`          |
//! | `config` | `packsmith.toml` + environment overrides              |

pub mod config;
pub mod errors;
pub mod generator;
pub mod ledger;
pub mod models;
pub mod modules;
pub mod orchestrator;
pub mod plan;
pub mod progress;
pub mod publisher;
