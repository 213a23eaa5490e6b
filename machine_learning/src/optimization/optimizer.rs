use crate::Result;

pub trait Optimizer {
    /// Updates `params` in place with one step along `grad`.
    ///
    /// # Returns
    /// An error if `grad` and `params` differ in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;

    /// The learning rate the next update will use.
    fn learning_rate(&self) -> f32;

    /// Overrides the learning rate, letting schedules drive the optimizer.
    fn set_learning_rate(&mut self, learning_rate: f32);
}
