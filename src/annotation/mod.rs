//! Annotation - Deduplicated waits and writes of object annotations

pub mod reconciler;

pub use reconciler::AnnotationReconciler;
