mod adadelta;
mod gradient_descent;
mod optimizer;

pub use adadelta::Adadelta;
pub use gradient_descent::GradientDescent;
pub use optimizer::Optimizer;
