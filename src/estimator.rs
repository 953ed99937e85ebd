//! Train / evaluate / predict orchestration for the classifier
//!
//! The [`Estimator`] owns the model parameters and the global step. Each
//! operation drives [`Classifier::model_fn`] in the matching mode:
//! - `train`: plain SGD with a fixed learning rate over batches from an [`InputFn`]
//! - `evaluate`: one pass with dropout disabled, mean batch loss and accuracy
//! - `predict`: class id and probabilities for each input row

use std::fmt;

use anyhow::{Context, Result, ensure};
use burn::{
    config::Config,
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    optim::{GradientsParams, Optimizer, SgdConfig},
    tensor::{ElementConversion, Float, Tensor, backend::AutodiffBackend},
};
use serde::Serialize;

use crate::data::{Batch, InputFn, Row, RowBatcher, RowDataset};
use crate::hooks::{StepOutputs, TrainingHook};
use crate::model::{Accuracy, Classifier, Mode, ModelConfig, Prediction, TrainSpec};

#[derive(Config, Debug)]
pub struct EstimatorConfig {
    #[config(default = 0.001)]
    pub learning_rate: f64,
    /// Log loss and step every this many global steps, 0 disables it
    #[config(default = 100)]
    pub log_step_count_steps: usize,
}

/// Result of a `train` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    pub global_step: usize,
    /// Steps actually run, fewer than requested if the input ran out
    pub steps: usize,
    pub final_loss: f64,
}

/// Metrics of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvalResults {
    pub accuracy: f64,
    pub loss: f64,
    pub global_step: usize,
}

impl fmt::Display for EvalResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy = {:.4}, loss = {:.6}, global_step = {}",
            self.accuracy, self.loss, self.global_step
        )
    }
}

pub struct Estimator<B: AutodiffBackend> {
    model: Classifier<B>,
    config: EstimatorConfig,
    global_step: usize,
    device: B::Device,
}

impl<B: AutodiffBackend> Estimator<B> {
    /// Creates an estimator around a freshly initialized classifier
    ///
    /// # Arguments
    /// * `model_config` - Layer sizes of the classifier
    /// * `config` - Learning rate and logging cadence
    /// * `device` - The device parameters and batches live on
    pub fn new(model_config: &ModelConfig, config: EstimatorConfig, device: B::Device) -> Self {
        let model = model_config.init::<B>(&device);

        Self {
            model,
            config,
            global_step: 0,
            device,
        }
    }

    pub fn global_step(&self) -> usize {
        self.global_step
    }

    pub fn num_params(&self) -> usize {
        self.model.num_params()
    }

    fn check_width(&self, dataset: &RowDataset) -> Result<()> {
        ensure!(
            dataset.in_dim() == self.model.in_dim(),
            "dataset rows have {} features but the model expects {}",
            dataset.in_dim(),
            self.model.in_dim()
        );
        Ok(())
    }

    /// Runs `steps` optimizer steps on batches drawn from `input_fn`
    ///
    /// Every hook sees each step after the parameters were updated. Training
    /// stops early when a finite input runs out of batches. Hooks get `end`
    /// even when a step fails; the steps completed before the failure are kept.
    ///
    /// # Arguments
    /// * `dataset` - Training rows and labels
    /// * `input_fn` - Batch size, shuffling and epoch count
    /// * `steps` - Number of optimizer steps to add to the global step
    /// * `hooks` - Observers called around the run and after every step
    ///
    /// # Returns
    /// * `Ok(TrainSummary)` - Global step, steps run and loss of the last step
    /// * `Err` - If the input is malformed or the loss becomes non-finite
    ///
    /// # Example
    /// ```
    /// let input_fn = InputFn::new(100).with_shuffle(true);
    /// let mut logging_hook = LoggingTensorHook::new(50);
    /// estimator.train(&train_data, &input_fn, 20000, &mut [&mut logging_hook])?;
    /// ```
    pub fn train(
        &mut self,
        dataset: &RowDataset,
        input_fn: &InputFn,
        steps: usize,
        hooks: &mut [&mut dyn TrainingHook<B::InnerBackend>],
    ) -> Result<TrainSummary> {
        self.check_width(dataset)?;
        ensure!(input_fn.batch_size > 0, "batch size must be positive");

        let mut optimizer = SgdConfig::new().init::<B, Classifier<B>>();
        let mut batches = input_fn.batches(dataset);
        let mut model = self.model.clone();
        let start_step = self.global_step;
        let mut global_step = start_step;
        let mut final_loss = f64::NAN;

        for hook in hooks.iter_mut() {
            hook.begin(global_step);
        }

        let mut outcome = Ok(());
        for _ in 0..steps {
            let Some(indices) = batches.next() else {
                tracing::info!(global_step, "input exhausted, stopping training early");
                break;
            };
            let rows: Vec<Row> = indices.iter().filter_map(|&index| dataset.get(index)).collect();
            let batch: Batch<B> = RowBatcher.batch(rows, &self.device);

            let (spec, loss) = match train_loss(&model, batch, global_step) {
                Ok(step) => step,
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            };

            let grads = GradientsParams::from_grads(spec.loss.backward(), &model);
            model = optimizer.step(self.config.learning_rate, model, grads);
            global_step += 1;
            final_loss = loss;

            let every = self.config.log_step_count_steps;
            if global_step == start_step + 1 || (every > 0 && global_step % every == 0) {
                tracing::info!("loss = {:.6}, step = {}", loss, global_step);
            }

            let outputs = StepOutputs {
                global_step,
                loss,
                probabilities: spec.probabilities.inner(),
            };
            for hook in hooks.iter_mut() {
                hook.after_step(&outputs);
            }
        }

        self.model = model;
        self.global_step = global_step;

        for hook in hooks.iter_mut() {
            hook.end(global_step);
        }
        outcome?;
        tracing::info!(global_step, "loss for final step: {:.6}", final_loss);

        Ok(TrainSummary {
            global_step,
            steps: global_step - start_step,
            final_loss,
        })
    }

    /// Runs one pass over `dataset` with dropout disabled
    ///
    /// `loss` is the mean of the per-batch mean losses and `accuracy` is taken
    /// over every example.
    ///
    /// # Returns
    /// * `Ok(EvalResults)` - Accuracy, loss and the current global step
    /// * `Err` - If the input repeats forever or yields no batches
    pub fn evaluate(&self, dataset: &RowDataset, input_fn: &InputFn) -> Result<EvalResults> {
        self.check_width(dataset)?;
        let loader = input_fn.loader::<B::InnerBackend>(dataset, &self.device)?;
        let epochs = input_fn.num_epochs.unwrap_or(1);

        let model = self.model.valid();
        let mut loss_sum = 0.0;
        let mut batch_count = 0usize;
        let mut accuracy = Accuracy::default();

        for _ in 0..epochs {
            for batch in loader.iter() {
                let spec = model
                    .model_fn(Mode::Eval {
                        features: batch.features,
                        labels: batch.labels,
                    })
                    .into_eval()?;

                loss_sum += spec.loss.into_scalar().elem::<f64>();
                batch_count += 1;
                accuracy += spec.accuracy;
            }
        }
        ensure!(batch_count > 0, "evaluation input produced no batches");

        let results = EvalResults {
            accuracy: accuracy.value(),
            loss: loss_sum / batch_count as f64,
            global_step: self.global_step,
        };
        tracing::debug!(batch_count, examples = accuracy.total, "evaluation pass finished");
        tracing::info!("Evaluation for global step {}: {}", self.global_step, results);

        Ok(results)
    }

    /// Predicts the class of every row in a flat row-major feature buffer
    ///
    /// # Arguments
    /// * `features` - `n * in_dim` values, `n >= 1`
    ///
    /// # Returns
    /// * `Ok(Vec<Prediction>)` - One class id and probability vector per row
    /// * `Err` - If the buffer is empty or not a whole number of rows
    pub fn predict(&self, features: &[f32]) -> Result<Vec<Prediction>> {
        let in_dim = self.model.in_dim();
        ensure!(
            !features.is_empty() && features.len() % in_dim == 0,
            "{} values do not form rows of width {}",
            features.len(),
            in_dim
        );
        let rows = features.len() / in_dim;

        let model = self.model.valid();
        let features = Tensor::<B::InnerBackend, 1, Float>::from_floats(features, &self.device)
            .reshape([rows, in_dim]);
        let predictions = model
            .model_fn(Mode::Predict { features })
            .into_predict()
            .context("predicting input rows")?;

        Ok(predictions.into_rows())
    }
}

/// Runs the model function in training mode and reads back the loss
fn train_loss<B: AutodiffBackend>(
    model: &Classifier<B>,
    batch: Batch<B>,
    global_step: usize,
) -> Result<(TrainSpec<B>, f64)> {
    let spec = model
        .model_fn(Mode::Train {
            features: batch.features,
            labels: batch.labels,
        })
        .into_train()?;

    let loss: f64 = spec.loss.clone().into_scalar().elem();
    ensure!(
        loss.is_finite(),
        "model diverged with loss = {loss} at step {global_step}"
    );

    Ok((spec, loss))
}
