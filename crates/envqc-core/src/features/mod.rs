mod rolling;
mod time;

pub use rolling::{parse_window, RollingWindowFeaturizer};
pub use time::{season_of_month, TimeFeatureDeriver};
