//! Dense classifier and its mode-dispatched model function
//!
//! The network is a single hidden layer with dropout:
//! input (reshaped to `[-1, in_dim]`) → dense (ReLU) → dropout → dense (logits).
//! [`Classifier::model_fn`] turns one [`Mode`] request into the matching
//! [`EstimatorSpec`], so each execution mode carries only its own outputs.

use std::ops::AddAssign;

use anyhow::{Result, bail};
use burn::{
    config::Config,
    module::Module,
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu, loss::CrossEntropyLossConfig},
    tensor::{ElementConversion, Float, Int, Tensor, activation::softmax, backend::Backend},
};

/// Layer sizes and regularization of the classifier
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 3)]
    pub in_dim: usize,
    #[config(default = 10)]
    pub hidden_units: usize,
    #[config(default = 2)]
    pub class_num: usize,
    #[config(default = 0.4)]
    pub dropout: f64,
}

impl ModelConfig {
    /// Creates a classifier with freshly initialized weights
    ///
    /// # Arguments
    /// * `device` - The device to initialize the model on (CPU/GPU)
    ///
    /// # Example
    /// ```
    /// let device = NdArrayDevice::Cpu;
    /// let model = ModelConfig::new().init::<NdArray>(&device);
    /// ```
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier {
            dense: LinearConfig::new(self.in_dim, self.hidden_units).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            logits: LinearConfig::new(self.hidden_units, self.class_num).init(device),
            activation: Relu::new(),
        }
    }
}

/// Feed-forward classifier
///
/// Architecture: in_dim → hidden_units (ReLU, dropout) → class_num
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    dense: Linear<B>,
    dropout: Dropout,
    logits: Linear<B>,
    activation: Relu,
}

/// One request to the model function
///
/// Only the training and evaluation modes carry labels.
#[derive(Debug, Clone)]
pub enum Mode<B: Backend> {
    Train {
        features: Tensor<B, 2, Float>,
        labels: Tensor<B, 1, Int>,
    },
    Eval {
        features: Tensor<B, 2, Float>,
        labels: Tensor<B, 1, Int>,
    },
    Predict {
        features: Tensor<B, 2, Float>,
    },
}

/// Mode-specific output of the model function
#[derive(Debug, Clone)]
pub enum EstimatorSpec<B: Backend> {
    Train(TrainSpec<B>),
    Eval(EvalSpec<B>),
    Predict(Predictions<B>),
}

/// Training output: the loss to minimize
///
/// `probabilities` is exposed so hooks can watch the softmax output during training.
#[derive(Debug, Clone)]
pub struct TrainSpec<B: Backend> {
    /// Mean sparse softmax cross-entropy, shape `[1]`
    pub loss: Tensor<B, 1, Float>,
    /// Shape `[batch_size, class_num]`
    pub probabilities: Tensor<B, 2, Float>,
}

/// Evaluation output: loss and accuracy for one batch
#[derive(Debug, Clone)]
pub struct EvalSpec<B: Backend> {
    pub loss: Tensor<B, 1, Float>,
    pub accuracy: Accuracy,
}

#[derive(Debug, Clone)]
pub struct Predictions<B: Backend> {
    /// Arg-max of the logits, shape `[batch_size]`
    pub classes: Tensor<B, 1, Int>,
    /// Softmax of the logits, shape `[batch_size, class_num]`
    pub probabilities: Tensor<B, 2, Float>,
}

/// Prediction for a single input row
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub class_id: usize,
    pub probabilities: Vec<f32>,
}

/// Streaming classification accuracy
///
/// Batches are combined with `+=`; the final value is `correct / total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    /// Counts how many predicted classes equal the labels
    ///
    /// # Arguments
    /// * `classes` - Predicted class indices of shape `[batch_size]`
    /// * `labels` - True class labels of shape `[batch_size]`
    pub fn from_classes<B: Backend>(classes: Tensor<B, 1, Int>, labels: Tensor<B, 1, Int>) -> Self {
        let total = labels.dims()[0];
        let correct: i64 = classes.equal(labels).int().sum().into_scalar().elem();

        Self {
            correct: correct as usize,
            total,
        }
    }

    /// Fraction of correct predictions, 0.0 when nothing was counted
    pub fn value(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

impl AddAssign for Accuracy {
    fn add_assign(&mut self, other: Self) {
        self.correct += other.correct;
        self.total += other.total;
    }
}

impl<B: Backend> Predictions<B> {
    fn from_logits(logits: Tensor<B, 2, Float>) -> Self {
        let classes = logits.clone().argmax(1).flatten::<1>(0, 1);
        let probabilities = softmax(logits, 1);

        Self {
            classes,
            probabilities,
        }
    }

    /// Moves the predictions to the host, one entry per input row
    pub fn into_rows(self) -> Vec<Prediction> {
        let class_num = self.probabilities.dims()[1];
        let probabilities: Vec<f32> = self.probabilities.into_data().iter::<f32>().collect();
        let classes: Vec<i64> = self.classes.into_data().iter::<i64>().collect();

        classes
            .into_iter()
            .zip(probabilities.chunks(class_num))
            .map(|(class_id, row)| Prediction {
                class_id: class_id as usize,
                probabilities: row.to_vec(),
            })
            .collect()
    }
}

impl<B: Backend> EstimatorSpec<B> {
    fn mode_name(&self) -> &'static str {
        match self {
            EstimatorSpec::Train(_) => "train",
            EstimatorSpec::Eval(_) => "eval",
            EstimatorSpec::Predict(_) => "predict",
        }
    }

    pub fn into_train(self) -> Result<TrainSpec<B>> {
        match self {
            EstimatorSpec::Train(spec) => Ok(spec),
            other => bail!("expected a train spec, got {}", other.mode_name()),
        }
    }

    pub fn into_eval(self) -> Result<EvalSpec<B>> {
        match self {
            EstimatorSpec::Eval(spec) => Ok(spec),
            other => bail!("expected an eval spec, got {}", other.mode_name()),
        }
    }

    pub fn into_predict(self) -> Result<Predictions<B>> {
        match self {
            EstimatorSpec::Predict(predictions) => Ok(predictions),
            other => bail!("expected a predict spec, got {}", other.mode_name()),
        }
    }
}

impl<B: Backend> Classifier<B> {
    /// Width of the input rows the first layer expects
    pub fn in_dim(&self) -> usize {
        self.dense.weight.val().dims()[0]
    }

    /// Performs a forward pass and returns the logits
    ///
    /// The input is reshaped to `[-1, in_dim]` first, so any tensor whose
    /// element count is a multiple of `in_dim` is accepted. Dropout is only
    /// applied when `training` is set.
    ///
    /// # Arguments
    /// * `features` - Input tensor holding `n * in_dim` values
    /// * `training` - Whether this pass belongs to a training step
    ///
    /// # Returns
    /// * `Tensor<B, 2, Float>` - Logits of shape `[n, class_num]`
    pub fn forward(&self, features: Tensor<B, 2, Float>, training: bool) -> Tensor<B, 2, Float> {
        let in_dim = self.in_dim();
        let [rows, cols] = features.dims();
        let x = features.reshape([rows * cols / in_dim, in_dim]);

        let x = self.dense.forward(x);
        let x = self.activation.forward(x);
        let x = if training { self.dropout.forward(x) } else { x };
        self.logits.forward(x)
    }

    /// Runs the network for one mode and builds that mode's outputs
    ///
    /// * `Predict` - class ids and softmax probabilities
    /// * `Train` - cross-entropy loss (dropout active) and probabilities
    /// * `Eval` - cross-entropy loss and accuracy
    pub fn model_fn(&self, mode: Mode<B>) -> EstimatorSpec<B> {
        match mode {
            Mode::Predict { features } => {
                let logits = self.forward(features, false);
                EstimatorSpec::Predict(Predictions::from_logits(logits))
            }
            Mode::Train { features, labels } => {
                let logits = self.forward(features, true);
                let loss = cross_entropy(logits.clone(), labels);
                let probabilities = softmax(logits, 1);
                EstimatorSpec::Train(TrainSpec {
                    loss,
                    probabilities,
                })
            }
            Mode::Eval { features, labels } => {
                let logits = self.forward(features, false);
                let classes = logits.clone().argmax(1).flatten::<1>(0, 1);
                let accuracy = Accuracy::from_classes(classes, labels.clone());
                let loss = cross_entropy(logits, labels);
                EstimatorSpec::Eval(EvalSpec { loss, accuracy })
            }
        }
    }
}

fn cross_entropy<B: Backend>(
    logits: Tensor<B, 2, Float>,
    labels: Tensor<B, 1, Int>,
) -> Tensor<B, 1, Float> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn features<B: Backend>(rows: usize) -> Tensor<B, 2, Float> {
        let values: Vec<f32> = (0..rows * 3).map(|v| (v % 7) as f32 / 7.0).collect();
        Tensor::<B, 1, Float>::from_floats(values.as_slice(), &B::Device::default()).reshape([rows, 3])
    }

    fn labels<B: Backend>(rows: usize) -> Tensor<B, 1, Int> {
        let values: Vec<i64> = (0..rows as i64).map(|v| v % 2).collect();
        Tensor::<B, 1, Int>::from_ints(values.as_slice(), &B::Device::default())
    }

    #[test]
    fn predict_returns_class_and_probabilities_for_any_batch_size() {
        let model = ModelConfig::new().init::<TestBackend>(&NdArrayDevice::Cpu);

        for rows in [1, 7, 100] {
            let predictions = model
                .model_fn(Mode::Predict {
                    features: features(rows),
                })
                .into_predict()
                .unwrap();

            assert_eq!(predictions.classes.dims(), [rows]);
            assert_eq!(predictions.probabilities.dims(), [rows, 2]);

            let rows_out = predictions.into_rows();
            assert_eq!(rows_out.len(), rows);
            for prediction in rows_out {
                assert_eq!(prediction.probabilities.len(), 2);
                assert!(prediction.class_id < 2);
                let sum: f32 = prediction.probabilities.iter().sum();
                assert!((sum - 1.0).abs() < 1e-5);
                let best = if prediction.probabilities[1] > prediction.probabilities[0] { 1 } else { 0 };
                assert_eq!(prediction.class_id, best);
            }
        }
    }

    #[test]
    fn input_is_reshaped_to_rows_of_in_dim() {
        let model = ModelConfig::new().init::<TestBackend>(&NdArrayDevice::Cpu);
        let flat = features::<TestBackend>(4).reshape([1, 12]);

        let logits = model.forward(flat, false);

        assert_eq!(logits.dims(), [4, 2]);
    }

    #[test]
    fn train_mode_yields_a_scalar_loss() {
        let model = ModelConfig::new().init::<TestAutodiffBackend>(&NdArrayDevice::Cpu);

        let spec = model
            .model_fn(Mode::Train {
                features: features(8),
                labels: labels(8),
            })
            .into_train()
            .unwrap();

        assert_eq!(spec.loss.dims(), [1]);
        let loss: f64 = spec.loss.into_scalar().elem();
        assert!(loss.is_finite() && loss > 0.0);
        assert_eq!(spec.probabilities.dims(), [8, 2]);
    }

    #[test]
    fn eval_mode_counts_every_example() {
        let model = ModelConfig::new().init::<TestBackend>(&NdArrayDevice::Cpu);

        let spec = model
            .model_fn(Mode::Eval {
                features: features(10),
                labels: labels(10),
            })
            .into_eval()
            .unwrap();

        assert_eq!(spec.accuracy.total, 10);
        assert!(spec.accuracy.correct <= 10);
        let loss: f64 = spec.loss.into_scalar().elem();
        assert!(loss.is_finite());
    }

    #[test]
    fn dropout_is_inactive_outside_training() {
        let model = ModelConfig::new()
            .with_dropout(0.9)
            .init::<TestAutodiffBackend>(&NdArrayDevice::Cpu);
        let run = || {
            let spec = model
                .model_fn(Mode::Eval {
                    features: features(20),
                    labels: labels(20),
                })
                .into_eval()
                .unwrap();
            spec.loss.into_scalar().elem::<f64>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn dropout_is_active_in_training() {
        let model = ModelConfig::new()
            .with_dropout(0.9)
            .init::<TestAutodiffBackend>(&NdArrayDevice::Cpu);
        let losses: Vec<f64> = (0..5)
            .map(|_| {
                let spec = model
                    .model_fn(Mode::Train {
                        features: features(20),
                        labels: labels(20),
                    })
                    .into_train()
                    .unwrap();
                spec.loss.into_scalar().elem::<f64>()
            })
            .collect();

        assert!(
            losses.iter().any(|loss| *loss != losses[0]),
            "identical losses with dropout active: {losses:?}"
        );
    }

    #[test]
    fn spec_accessors_reject_other_modes() {
        let model = ModelConfig::new().init::<TestBackend>(&NdArrayDevice::Cpu);
        let spec = model.model_fn(Mode::Predict {
            features: features(2),
        });

        assert!(spec.clone().into_train().is_err());
        assert!(spec.clone().into_eval().is_err());
        assert!(spec.into_predict().is_ok());
    }

    #[test]
    fn accuracy_accumulates_across_batches() {
        let mut accuracy = Accuracy::default();
        assert_eq!(accuracy.value(), 0.0);

        accuracy += Accuracy { correct: 3, total: 4 };
        accuracy += Accuracy { correct: 1, total: 4 };

        assert_eq!(accuracy, Accuracy { correct: 4, total: 8 });
        assert_eq!(accuracy.value(), 0.5);
    }

    #[test]
    fn accuracy_from_classes_compares_elementwise() {
        let device = NdArrayDevice::Cpu;
        let classes = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1, 0].as_slice(), &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 0, 0].as_slice(), &device);

        let accuracy = Accuracy::from_classes(classes, labels);

        assert_eq!(accuracy, Accuracy { correct: 3, total: 4 });
    }
}
