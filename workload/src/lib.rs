//! Job modules that can be run by name.

use std::sync::Arc;

use mrb_runtime::JobModule;

pub mod grep;
pub mod vertex_degree;
pub mod wc;

/// Names of every known workload, in the order `list` prints them.
pub fn names() -> &'static [&'static str] {
    &["wc", "vertex-degree", "grep"]
}

/// Look up a workload by name.
pub fn try_named(name: &str) -> Option<Arc<dyn JobModule>> {
    match name {
        "wc" => Some(Arc::new(wc::WordCount)),
        "vertex-degree" => Some(Arc::new(vertex_degree::VertexDegree)),
        "grep" => Some(Arc::new(grep::Grep)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_name_resolves() {
        for name in names() {
            let module = try_named(name).unwrap();
            assert_eq!(module.name(), *name);
        }
        assert!(try_named("matrix-multiply").is_none());
    }
}
