pub mod rolling_range;

pub use rolling_range::{
    DateRange, RangePreset, build_rolling_range, parse_timezone, range_touches_today, today_in,
};
