pub mod bar;
pub mod bar_series;
pub mod quote;
pub mod rate;
pub mod request_params;
