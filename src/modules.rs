//! Module partitioning.
//!
//! Groups planned file tasks into ordered build modules so generation
//! respects coarse dependency order: config/setup first, then backend,
//! then the service layer, then UI. Classification is a handful of
//! path heuristics; the fixed order is the only dependency ordering the
//! pipeline enforces.

use crate::models::{BuildModule, FileTask, ModuleKind};

/// Build order. Backend is classified before services so that a path like
/// `backend/api/routes.js` lands in the backend bucket.
const BUILD_ORDER: [ModuleKind; 4] = [
    ModuleKind::Setup,
    ModuleKind::Backend,
    ModuleKind::Services,
    ModuleKind::Ui,
];

/// Classify a single file task by path.
fn classify(task: &FileTask) -> ModuleKind {
    let path = task.path.as_str();
    let first = path.split('/').next().unwrap_or(path);

    if matches!(first, "backend" | "server") {
        ModuleKind::Backend
    } else if path.contains("service") || path.split('/').any(|seg| seg == "api") {
        ModuleKind::Services
    } else if matches!(first, "frontend" | "client" | "ui") {
        ModuleKind::Ui
    } else {
        // Manifests, docs, top-level config.
        ModuleKind::Setup
    }
}

/// Partition file tasks into build modules.
///
/// Every input task appears in exactly one output module, empty modules are
/// omitted, and the output order is always setup, backend, services, UI.
pub fn partition(tasks: &[FileTask]) -> Vec<BuildModule> {
    BUILD_ORDER
        .iter()
        .filter_map(|&kind| {
            let bucket: Vec<FileTask> = tasks
                .iter()
                .filter(|t| classify(t) == kind)
                .cloned()
                .collect();
            if bucket.is_empty() {
                None
            } else {
                Some(BuildModule { kind, tasks: bucket })
            }
        })
        .collect()
}
