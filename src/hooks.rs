//! Hooks invoked by the estimator around training steps

use burn::tensor::{Float, Tensor, backend::Backend};

/// What a training step exposes to hooks
#[derive(Debug, Clone)]
pub struct StepOutputs<B: Backend> {
    /// Global step after the optimizer update
    pub global_step: usize,
    pub loss: f64,
    /// Softmax output of the batch, shape `[batch_size, class_num]`
    pub probabilities: Tensor<B, 2, Float>,
}

/// Observer of a training run
pub trait TrainingHook<B: Backend> {
    /// Called once before the first step of a `train` call
    fn begin(&mut self, _global_step: usize) {}

    fn after_step(&mut self, outputs: &StepOutputs<B>);

    /// Called once after the last step of a `train` call
    fn end(&mut self, _global_step: usize) {}
}

/// Logs the softmax probabilities and the step loss on the first step and every
/// `every_n_iter` steps after it
#[derive(Debug, Clone)]
pub struct LoggingTensorHook {
    every_n_iter: usize,
    max_rows: usize,
    iter_count: usize,
    emitted: usize,
}

impl LoggingTensorHook {
    pub fn new(every_n_iter: usize) -> Self {
        Self {
            every_n_iter,
            max_rows: 5,
            iter_count: 0,
            emitted: 0,
        }
    }

    /// Limits how many batch rows are written per log line
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Number of log lines written so far
    #[cfg(test)]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn should_trigger(&self) -> bool {
        self.every_n_iter > 0 && self.iter_count % self.every_n_iter == 0
    }
}

impl<B: Backend> TrainingHook<B> for LoggingTensorHook {
    fn begin(&mut self, _global_step: usize) {
        self.iter_count = 0;
    }

    fn after_step(&mut self, outputs: &StepOutputs<B>) {
        if self.should_trigger() {
            let class_num = outputs.probabilities.dims()[1];
            let values: Vec<f32> = outputs
                .probabilities
                .clone()
                .into_data()
                .iter::<f32>()
                .take(self.max_rows * class_num)
                .collect();
            let rows: Vec<&[f32]> = values.chunks(class_num).collect();

            tracing::info!(
                step = outputs.global_step,
                loss = outputs.loss,
                "probabilities = {:?}",
                rows
            );
            self.emitted += 1;
        }
        self.iter_count += 1;
    }
}
