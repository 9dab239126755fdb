//! Collection aliases used throughout the crate.

pub use std::collections::{BTreeMap, HashMap, HashSet};
