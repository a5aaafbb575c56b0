//! Extensions shipped with the host.

mod core_example;

pub use core_example::{CoreExample, CORE_EXAMPLE_ID};

use super::catalog::ExtensionCatalog;
use super::extension::Extension;

/// Add every built-in extension to `catalog`.
pub fn register(catalog: &mut ExtensionCatalog) {
    catalog.register(CORE_EXAMPLE_ID, |runtime, _| {
        Ok(Box::new(CoreExample::new(runtime)) as Box<dyn Extension>)
    });
}
