//! Tunable defaults.
//!
//! There is no file or environment-backed configuration layer: the
//! original has none, and adding one would be inventing a feature the
//! spec never asked for. What's here are the few constants an embedder
//! plausibly wants to override at tree-construction time.

/// Construction-time knobs for a [`crate::tree::Tree`].
#[derive(Clone, Debug)]
pub struct TreeConfig {
    /// Name of the implicit root created by [`crate::tree::Tree::new`].
    pub global_root_name: &'static str,
    /// Initial capacity hint for the node arena.
    pub node_capacity_hint: usize,
    /// Initial capacity hint for the subscription arena.
    pub subscription_capacity_hint: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            global_root_name: "global",
            node_capacity_hint: 256,
            subscription_capacity_hint: 64,
        }
    }
}

/// Construction-time knobs for a [`crate::courier::Courier`].
#[derive(Clone, Debug, Default)]
pub struct CourierConfig {
    /// Friendly name used in log lines, e.g. "ui", "mainloop".
    pub name: Option<&'static str>,
}
