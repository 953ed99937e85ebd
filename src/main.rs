mod data;
mod estimator;
mod hooks;
mod model;

use anyhow::Result;
use burn::backend::{Autodiff, NdArray, ndarray::NdArrayDevice};
use burn::data::dataset::Dataset;
use rand::{SeedableRng, rngs::StdRng};
use tracing_subscriber::EnvFilter;

use crate::data::{DataConfig, InputFn};
use crate::estimator::{Estimator, EstimatorConfig};
use crate::hooks::LoggingTensorHook;
use crate::model::ModelConfig;

// Hyperparameters
const TRAIN_STEPS: usize = 20000;
const TRAIN_BATCH_SIZE: usize = 100;
const EVAL_BATCH_SIZE: usize = 128;
const LOG_EVERY_N_ITER: usize = 50;
const LOG_MAX_ROWS: usize = 4;

type TrainBackend = Autodiff<NdArray>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("dense_classifier=info".parse()?),
        )
        .init();

    let mut rng = StdRng::from_os_rng();
    let data_config = DataConfig::new();
    let train_data = data::generate_dummy(&data_config, &mut rng)?;
    let eval_data = train_data.clone();
    tracing::info!(
        rows = train_data.len(),
        in_dim = train_data.in_dim(),
        prototypes = data_config.data_type_count,
        "generated dummy data"
    );

    let device = NdArrayDevice::Cpu;
    let model_config = ModelConfig::new().with_in_dim(train_data.in_dim());
    let mut classifier =
        Estimator::<TrainBackend>::new(&model_config, EstimatorConfig::new(), device);
    tracing::info!("Total parameters: {}", classifier.num_params());

    let eval_input_fn = InputFn::new(EVAL_BATCH_SIZE).with_num_epochs(1);
    let initial_results = classifier.evaluate(&eval_data, &eval_input_fn)?;
    tracing::info!(
        "Model accuracy before training: {:.4}",
        initial_results.accuracy
    );

    let mut logging_hook = LoggingTensorHook::new(LOG_EVERY_N_ITER).with_max_rows(LOG_MAX_ROWS);
    let train_input_fn = InputFn::new(TRAIN_BATCH_SIZE).with_shuffle(true);
    let summary = classifier.train(
        &train_data,
        &train_input_fn,
        TRAIN_STEPS,
        &mut [&mut logging_hook],
    )?;
    tracing::info!(
        global_step = summary.global_step,
        steps = summary.steps,
        "Final train loss: {:.4}",
        summary.final_loss
    );

    let eval_results = classifier.evaluate(&eval_data, &eval_input_fn)?;

    let dummy = data::dummy_input(train_data.in_dim());
    for prediction in classifier.predict(&dummy)? {
        tracing::info!(
            global_step = classifier.global_step(),
            class_id = prediction.class_id,
            "prediction for all-ones input: {:?}",
            prediction.probabilities
        );
    }

    println!("{}", serde_json::to_string(&eval_results)?);

    Ok(())
}
