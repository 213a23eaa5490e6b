mod conv;
mod dense;
mod pool;

pub use conv::Conv3x3;
pub use dense::Dense;
pub use pool::max_pool_2x2;
