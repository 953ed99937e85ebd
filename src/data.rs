//! Dummy data generation and batching for the dense classifier
//!
//! This module provides the synthetic dataset the driver trains on, an
//! in-memory row store exposed as a Burn [`Dataset`], the [`RowBatcher`] that
//! stacks rows into tensors, and the input function that feeds batches to the
//! estimator. Finite passes go through Burn's data loader; the repeat-forever
//! training input uses [`Batches`], which fills batches across epoch boundaries.

use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use burn::{
    config::Config,
    data::{
        dataloader::{DataLoader, DataLoaderBuilder, batcher::Batcher},
        dataset::Dataset,
    },
    tensor::{Float, Int, Tensor, backend::Backend},
};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};

/// Shape of the dummy dataset
///
/// `data_type_count` random prototype rows are drawn, and each one is repeated
/// `duplication` times.
#[derive(Config, Debug)]
pub struct DataConfig {
    #[config(default = 250)]
    pub duplication: usize,
    #[config(default = 4)]
    pub data_type_count: usize,
    #[config(default = 3)]
    pub in_dim: usize,
}

impl DataConfig {
    /// Total number of rows the generator will produce, `None` on overflow
    pub fn rows(&self) -> Option<usize> {
        self.duplication.checked_mul(self.data_type_count)
    }
}

/// One feature row and its class label
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub features: Vec<f32>,
    pub label: i64,
}

/// Feature rows and class labels held on the host
///
/// Features are stored row-major in a flat buffer of `len() * in_dim()` values.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDataset {
    features: Vec<f32>,
    labels: Vec<i64>,
    in_dim: usize,
}

/// A batch of rows converted into tensors on a device
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    /// Shape `[batch_size, in_dim]`
    pub features: Tensor<B, 2, Float>,
    /// Shape `[batch_size]`
    pub labels: Tensor<B, 1, Int>,
}

impl RowDataset {
    /// Builds a dataset from a flat row-major feature buffer and one label per row
    ///
    /// # Returns
    /// * `Ok(RowDataset)` - When the buffer holds exactly `labels.len()` rows of `in_dim` values
    /// * `Err` - If `in_dim` is zero or the buffer and labels disagree on the row count
    pub fn new(features: Vec<f32>, labels: Vec<i64>, in_dim: usize) -> Result<Self> {
        ensure!(in_dim > 0, "feature dimension must be positive");
        ensure!(
            features.len() == labels.len() * in_dim,
            "{} feature values do not form {} rows of width {}",
            features.len(),
            labels.len(),
            in_dim
        );

        Ok(Self {
            features,
            labels,
            in_dim,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    fn row(&self, index: usize) -> &[f32] {
        &self.features[index * self.in_dim..(index + 1) * self.in_dim]
    }
}

impl Dataset<Row> for RowDataset {
    fn get(&self, index: usize) -> Option<Row> {
        let label = *self.labels.get(index)?;
        Some(Row {
            features: self.row(index).to_vec(),
            label,
        })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Stacks rows into a [`Batch`] on the requested device
#[derive(Debug, Clone, Copy, Default)]
pub struct RowBatcher;

impl<B: Backend> Batcher<B, Row, Batch<B>> for RowBatcher {
    /// Flattens the rows into one buffer, then reshapes it to `[n, in_dim]`
    fn batch(&self, items: Vec<Row>, device: &B::Device) -> Batch<B> {
        let batch_size = items.len();
        let in_dim = items.first().map_or(0, |row| row.features.len());

        let features: Vec<f32> = items
            .iter()
            .flat_map(|row| row.features.iter().copied())
            .collect();
        let labels: Vec<i64> = items.iter().map(|row| row.label).collect();

        let features = Tensor::<B, 1, Float>::from_floats(features.as_slice(), device)
            .reshape([batch_size, in_dim]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), device);

        Batch { features, labels }
    }
}

/// Generates the duplicated-prototype dummy dataset
///
/// Draws `data_type_count` prototype rows with components uniform in `[0, 1)`,
/// repeats each one `duplication` times and concatenates them in order. The
/// first half of the rows is labelled 0 and the second half 1, regardless of
/// which prototype a row came from.
///
/// # Arguments
/// * `config` - Duplication factor, prototype count and feature width
/// * `rng` - Source of the prototype values
///
/// # Returns
/// * `Ok(RowDataset)` - `duplication * data_type_count` rows of width `config.in_dim`
/// * `Err` - If the row count overflows, is zero, or is odd, since the labels could not be split evenly
///
/// # Example
/// ```
/// let mut rng = StdRng::seed_from_u64(7);
/// let train_data = generate_dummy(&DataConfig::new(), &mut rng)?;
/// assert_eq!(train_data.len(), 1000);
/// ```
pub fn generate_dummy<R: Rng + ?Sized>(config: &DataConfig, rng: &mut R) -> Result<RowDataset> {
    let rows = config.rows().with_context(|| {
        format!(
            "{} prototypes repeated {} times overflow the row count",
            config.data_type_count, config.duplication
        )
    })?;
    ensure!(rows > 0, "dummy dataset must contain at least one row");
    ensure!(
        rows % 2 == 0,
        "{rows} rows cannot be split into two equal label halves"
    );
    let values = rows
        .checked_mul(config.in_dim)
        .context("dummy feature buffer size overflows")?;

    let mut features = Vec::with_capacity(values);
    for _ in 0..config.data_type_count {
        let prototype: Vec<f32> = (0..config.in_dim).map(|_| rng.random::<f32>()).collect();
        for _ in 0..config.duplication {
            features.extend_from_slice(&prototype);
        }
    }

    let labels: Vec<i64> = (0..rows).map(|row| i64::from(row >= rows / 2)).collect();

    RowDataset::new(features, labels, config.in_dim)
}

/// A single all-ones feature row
pub fn dummy_input(in_dim: usize) -> Vec<f32> {
    vec![1.0; in_dim]
}

/// Describes how a dataset is fed to the estimator
///
/// `num_epochs = None` repeats the data forever, which is what training uses;
/// evaluation uses a single epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFn {
    pub batch_size: usize,
    pub num_epochs: Option<usize>,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl InputFn {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            num_epochs: None,
            shuffle: false,
            seed: None,
        }
    }

    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = Some(num_epochs);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds a Burn data loader for a finite pass over `dataset`
    ///
    /// Each epoch is one iteration of the returned loader, so every epoch may
    /// end with a partial batch.
    ///
    /// # Returns
    /// * `Ok(loader)` - Batches of at most `batch_size` rows on `device`
    /// * `Err` - If the input repeats forever or the batch size is zero
    pub fn loader<B: Backend>(
        &self,
        dataset: &RowDataset,
        device: &B::Device,
    ) -> Result<Arc<dyn DataLoader<B, Batch<B>>>> {
        ensure!(self.batch_size > 0, "batch size must be positive");
        ensure!(
            self.num_epochs.is_some(),
            "a data loader pass needs a finite number of epochs"
        );

        let mut builder = DataLoaderBuilder::new(RowBatcher)
            .batch_size(self.batch_size)
            .set_device(device.clone());
        if self.shuffle {
            let seed = self.seed.unwrap_or_else(|| rand::rng().random());
            builder = builder.shuffle(seed);
        }

        Ok(builder.build(dataset.clone()))
    }

    /// Iterates over batches of row indices of `dataset`
    ///
    /// Batches are filled across epoch boundaries, so only the final batch of
    /// a finite run can be shorter than `batch_size`.
    pub fn batches(&self, dataset: &RowDataset) -> Batches {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut order: Vec<usize> = if self.num_epochs == Some(0) {
            Vec::new()
        } else {
            (0..dataset.len()).collect()
        };
        if self.shuffle {
            order.shuffle(&mut rng);
        }

        Batches {
            order,
            cursor: 0,
            epoch: 0,
            batch_size: self.batch_size,
            num_epochs: self.num_epochs,
            shuffle: self.shuffle,
            rng,
        }
    }
}

/// Iterator returned by [`InputFn::batches`]
#[derive(Debug)]
pub struct Batches {
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    batch_size: usize,
    num_epochs: Option<usize>,
    shuffle: bool,
    rng: StdRng,
}

impl Iterator for Batches {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.order.is_empty() {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.epoch += 1;
                if self.num_epochs.is_some_and(|limit| self.epoch >= limit) {
                    break;
                }
                self.cursor = 0;
                if self.shuffle {
                    self.order.shuffle(&mut self.rng);
                }
            }

            let take = (self.batch_size - batch.len()).min(self.order.len() - self.cursor);
            batch.extend_from_slice(&self.order[self.cursor..self.cursor + take]);
            self.cursor += take;
        }

        (!batch.is_empty()).then_some(batch)
    }
}
