pub mod logging;

use crate::registry::Registry;

pub fn register_tooling(registry: &Registry) {
    logging::register_logging(registry);
}
