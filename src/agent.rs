//! The continual-learning agent
//!
//! [`Agent`] wraps a task-headed [`Classifier`] together with its optimizer,
//! learning rate schedule and loss aggregator. It runs epoch-based training
//! over a [`BatchSource`], scores every batch with the task's metric through
//! the [`TaskRouter`], and validates after each epoch when a validation
//! source is supplied.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info, instrument};

use crate::checkpoint;
use crate::config::AgentConfig;
use crate::error::{Error, Result};
use crate::model::{build_model, count_parameters, Classifier, ModelInput, SequenceInput, TaskOutputs};
use crate::training::data::{Batch, BatchSource, RawInput};
use crate::training::loss::{BaseLoss, LossAggregator, ValidOutDim};
use crate::training::metrics::{AverageMeter, Timer};
use crate::training::optimizers::{create_optimizer, MultiStepScheduler, Optimizer};
use crate::training::progress::{LineSink, ProgressLog};
use crate::training::router::TaskRouter;
use crate::training::strategy::{DataParallel, ExecutionStrategy, SingleDevice};
use crate::training::tasks::{TaskKind, TaskMetric};

/// Continual-learning training agent
pub struct Agent {
    config: AgentConfig,
    model: Box<dyn Classifier>,
    aggregator: LossAggregator,
    optimizer: Box<dyn Optimizer>,
    scheduler: MultiStepScheduler,
    strategy: Box<dyn ExecutionStrategy>,
    device: Device,
    log: ProgressLog,
    training: bool,
    reset_optimizer: bool,
    base_loss: BaseLoss,
}

/// Turn a loader batch into model input
///
/// Sequence encodings must hold exactly token ids, attention mask and segment
/// ids; the batch targets travel along as labels.
pub fn prepare_input(batch: &Batch) -> Result<ModelInput> {
    match &batch.input {
        RawInput::Tensor(x) => Ok(ModelInput::Dense(x.clone())),
        RawInput::Sequence(parts) => match parts.as_slice() {
            [input_ids, attention_mask, token_type_ids] => Ok(ModelInput::Sequence(SequenceInput {
                input_ids: input_ids.clone(),
                attention_mask: attention_mask.clone(),
                token_type_ids: token_type_ids.clone(),
                labels: Some(batch.targets.clone()),
            })),
            _ => Err(Error::invalid_input(format!(
                "sequence input must hold input ids, attention mask and segment ids, got {} tensors",
                parts.len()
            ))),
        },
    }
}

impl Agent {
    /// Build the model from the configuration and wrap it
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let device = config.device()?;
        let model = build_model(&config.model, &config.out_dim, &device)?;
        Self::with_model(config, model)
    }

    /// Wrap an already built model, which must live on the configured device
    pub fn with_model(config: AgentConfig, model: Box<dyn Classifier>) -> Result<Self> {
        config.validate()?;
        let device = config.device()?;

        if let Some(weights) = &config.model_weights {
            checkpoint::load_strict(model.var_map(), weights)?;
        }

        let strategy: Box<dyn ExecutionStrategy> = match config.data_parallel_replicas() {
            1 => Box::new(SingleDevice),
            replicas => {
                info!("Data parallel execution over {} shards of each batch", replicas);
                Box::new(DataParallel::new(replicas)?)
            }
        };

        let (optimizer, scheduler) = Self::build_optimizer(&config, model.as_ref())?;
        info!(
            "Agent ready: {} heads, {} parameters, optimizer {}",
            config.out_dim.len(),
            count_parameters(model.var_map()),
            optimizer.name()
        );

        Ok(Self {
            aggregator: LossAggregator::new(config.is_multihead()),
            log: ProgressLog::new(config.print_freq),
            reset_optimizer: config.reset_optimizer,
            config,
            model,
            optimizer,
            scheduler,
            strategy,
            device,
            training: true,
            base_loss: BaseLoss::CrossEntropy,
        })
    }

    /// Replace the execution strategy
    pub fn with_strategy(mut self, strategy: Box<dyn ExecutionStrategy>) -> Self {
        debug!("Execution strategy: {}", strategy.name());
        self.strategy = strategy;
        self
    }

    /// Send progress lines to `sink` instead of tracing events
    pub fn with_log_sink(mut self, sink: LineSink) -> Self {
        self.log = ProgressLog::with_sink(self.config.print_freq, sink);
        self
    }

    fn build_optimizer(
        config: &AgentConfig,
        model: &dyn Classifier,
    ) -> Result<(Box<dyn Optimizer>, MultiStepScheduler)> {
        let params = config
            .optimizer
            .params(config.lr, config.momentum, config.weight_decay);
        let optimizer = create_optimizer(config.optimizer, &params, model.var_map().all_vars())?;
        let scheduler = MultiStepScheduler::new(config.lr, config.schedule.clone());
        Ok((optimizer, scheduler))
    }

    /// Rebuild optimizer and scheduler from the configuration
    pub fn init_optimizer(&mut self) -> Result<()> {
        let (optimizer, scheduler) = Self::build_optimizer(&self.config, self.model.as_ref())?;
        self.optimizer = optimizer;
        self.scheduler = scheduler;
        Ok(())
    }

    /// Rebuild the optimizer at the start of every `learn_batch`
    pub fn set_reset_optimizer(&mut self, reset: bool) {
        self.reset_optimizer = reset;
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Switch to evaluation mode
    pub fn eval(&mut self) {
        self.training = false;
    }

    /// Whether the agent is in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Forward pass in the current mode
    pub fn forward(&self, input: &ModelInput) -> Result<TaskOutputs> {
        self.model.forward(input, self.training)
    }

    /// Evaluation-mode forward pass with detached outputs
    ///
    /// Leaves the agent in evaluation mode.
    pub fn predict(&mut self, input: &ModelInput) -> Result<TaskOutputs> {
        self.eval();
        Ok(self.forward(input)?.detach())
    }

    /// Loss of a batch under the current task's base loss
    pub fn criterion(&self, preds: &TaskOutputs, targets: &Tensor, tasks: &[String]) -> Result<Tensor> {
        self.aggregator.criterion(preds, targets, tasks, self.base_loss)
    }

    /// One optimization step; returns the batch loss and the detached outputs
    pub fn update_model(&mut self, batch: &Batch) -> Result<(f64, TaskOutputs)> {
        let vars = self.model.var_map().all_vars();
        let model = self.model.as_ref();
        let aggregator = &self.aggregator;
        let base_loss = self.base_loss;
        let training = self.training;

        let forward = |b: &Batch| -> Result<(Tensor, TaskOutputs)> {
            let input = prepare_input(b)?;
            let out = model.forward(&input, training)?;
            let loss = aggregator.criterion(&out, &b.targets, &b.tasks, base_loss)?;
            Ok((loss, out))
        };

        self.optimizer.zero_grad()?;
        let step = self.strategy.train_step(batch, &vars, &forward)?;
        self.optimizer.step(&step.grads)?;

        let loss = step.loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        Ok((loss, step.outputs))
    }

    fn should_print(&self, i: usize, num_batches: usize) -> bool {
        let freq = self.config.print_freq;
        freq > 0 && (i % freq as usize == 0 || i + 1 == num_batches)
    }

    /// Train on `train_loader` for the configured number of epochs
    ///
    /// Returns the task metric averaged over the last epoch, 0.0 when no
    /// epoch ran.
    #[instrument(skip(self, train_loader, val_loader))]
    pub fn learn_batch(
        &mut self,
        train_name: &str,
        train_loader: &mut dyn BatchSource,
        mut val_loader: Option<&mut dyn BatchSource>,
    ) -> Result<f64> {
        if self.reset_optimizer {
            self.log.log("Optimizer is reset!");
            self.init_optimizer()?;
        }

        let kind = TaskKind::resolve(train_name, &self.config.task_output_modes);
        self.base_loss = kind.base_loss();
        let label = kind.metric.label();
        debug!("Task '{}': {:?}, loss {}", train_name, kind, self.base_loss.name());

        let mut last_epoch_metric = 0.0;
        for epoch in 0..self.config.epochs() {
            let mut data_timer = Timer::new();
            let mut batch_timer = Timer::new();
            let mut batch_time = AverageMeter::new();
            let mut data_time = AverageMeter::new();
            let mut losses = AverageMeter::new();
            let mut metric = AverageMeter::new();

            self.log.log(format!("Epoch:{epoch}"));
            self.train();
            let lr = self.scheduler.step_to(epoch);
            self.optimizer.set_learning_rate(lr);
            self.log.log(format!("LR: {lr}"));

            data_timer.tic();
            batch_timer.tic();
            self.log.log(format!("Itr\t\tTime\t\t  Data\t\t  Loss\t\t{label}"));
            let num_batches = train_loader.num_batches();
            for (i, batch) in train_loader.batches().enumerate() {
                let batch = batch?;
                data_time.update(data_timer.toc(), 1);

                let batch = batch.to_device(&self.device)?;
                let (loss, output) = self.update_model(&batch)?;
                losses.update(loss, batch.len());
                TaskRouter::accumulate(
                    &mut metric,
                    kind.metric,
                    &output,
                    &batch.targets,
                    &batch.tasks,
                    self.aggregator.valid_out_dim(),
                )?;

                batch_time.update(batch_timer.toc(), 1);
                batch_timer.tic();
                data_timer.tic();

                if self.should_print(i, num_batches) {
                    self.log.log(format!(
                        "[{}/{}]\t{:.4} ({:.4})\t{:.4} ({:.4})\t{:.3} ({:.3})\t{:.2} ({:.2})",
                        i,
                        num_batches,
                        batch_time.val,
                        batch_time.avg(),
                        data_time.val,
                        data_time.avg(),
                        losses.val,
                        losses.avg(),
                        metric.val,
                        metric.avg()
                    ));
                }
            }
            self.log.log(format!(" * Train {label} {:.3}", metric.avg()));
            last_epoch_metric = metric.avg();

            if let Some(val) = val_loader.as_deref_mut() {
                self.validation(train_name, val)?;
            }
        }
        Ok(last_epoch_metric)
    }

    /// Score the model on `loader` with the metric of `val_name`
    ///
    /// Forward passes still record the graph; outputs are detached before
    /// scoring and no backward pass runs. Restores the previous training mode
    /// before returning.
    #[instrument(skip(self, loader))]
    pub fn validation(&mut self, val_name: &str, loader: &mut dyn BatchSource) -> Result<f64> {
        let kind = TaskKind::resolve(val_name, &self.config.task_output_modes);
        let timer = Timer::new();
        let mut meter = AverageMeter::new();

        let orig_mode = self.training;
        self.eval();
        let pass = self.evaluate(kind.metric, loader, &mut meter);
        self.training = orig_mode;
        pass?;

        self.log.log(format!(
            " * Val {} {:.3}, Total time {:.2}",
            kind.metric.label(),
            meter.avg(),
            timer.toc()
        ));
        Ok(meter.avg())
    }

    fn evaluate(
        &mut self,
        metric: TaskMetric,
        loader: &mut dyn BatchSource,
        meter: &mut AverageMeter,
    ) -> Result<()> {
        for batch in loader.batches() {
            let batch = batch?.to_device(&self.device)?;
            let input = prepare_input(&batch)?;
            let output = self.predict(&input)?;
            TaskRouter::accumulate(
                meter,
                metric,
                &output,
                &batch.targets,
                &batch.tasks,
                self.aggregator.valid_out_dim(),
            )?;
        }
        Ok(())
    }

    /// Online learning from a stream of samples; not supported
    pub fn learn_stream(&mut self, _data: &Tensor, _label: &Tensor) -> Result<()> {
        Err(Error::unimplemented("learn_stream has no implementation yet"))
    }

    /// Grow the valid output dimension by `dim` classes and return it
    pub fn add_valid_output_dim(&mut self, dim: usize) -> usize {
        self.log.log(format!(
            "Incremental class: Old valid output dimension: {}",
            self.aggregator.valid_out_dim()
        ));
        let n = self.aggregator.add_valid_output_dim(dim);
        self.log.log(format!("Incremental class: New Valid output dimension: {n}"));
        n
    }

    /// Current valid output dimension
    pub fn valid_out_dim(&self) -> ValidOutDim {
        self.aggregator.valid_out_dim()
    }

    /// Total number of scalar parameters
    pub fn count_parameter(&self) -> usize {
        count_parameters(self.model.var_map())
    }

    /// Save the model weights to `<filename>.safetensors`
    pub fn save_model(&self, filename: impl AsRef<Path>) -> Result<PathBuf> {
        checkpoint::save(self.model.var_map(), filename)
    }

    /// Agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Wrapped model
    pub fn model(&self) -> &dyn Classifier {
        self.model.as_ref()
    }

    /// Active optimizer
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    /// Learning rate schedule
    pub fn scheduler(&self) -> &MultiStepScheduler {
        &self.scheduler
    }

    /// Name of the execution strategy
    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// Primary compute device
    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelSpec, TaskHead};
    use crate::model::SINGLE_HEAD;
    use crate::training::data::{TensorLoader, TensorLoaderConfig};
    use anyhow::Result;
    use std::sync::{Arc, Mutex};

    fn single_head_config() -> AgentConfig {
        AgentConfig {
            lr: 0.1,
            optimizer: crate::config::OptimizerKind::Sgd,
            model: ModelSpec::Mlp { in_dim: 2, hidden: vec![8] },
            out_dim: vec![TaskHead::new(SINGLE_HEAD, 2)],
            schedule: vec![2, 4],
            print_freq: 1,
            ..AgentConfig::default()
        }
    }

    fn separable_loader(device: &Device) -> Result<TensorLoader> {
        let x = Tensor::new(
            &[[2f32, 0.0], [1.5, 0.5], [0.0, 2.0], [0.5, 1.5], [2.0, 0.2], [0.2, 2.0]],
            device,
        )?;
        let y = Tensor::new(&[0u32, 0, 1, 1, 0, 1], device)?;
        Ok(TensorLoader::new(
            RawInput::Tensor(x),
            y,
            vec!["All".to_string(); 6],
            TensorLoaderConfig { batch_size: 3, shuffle: false, ..Default::default() },
        )?)
    }

    #[test]
    fn test_prepare_input_repackages_sequences() -> Result<()> {
        let device = Device::Cpu;
        let ids = Tensor::new(&[[1u32, 2], [3, 4]], &device)?;
        let batch = Batch::new(
            RawInput::Sequence(vec![ids.clone(), ids.ones_like()?, ids.zeros_like()?]),
            Tensor::new(&[0u32, 1], &device)?,
            vec!["rte".into(), "rte".into()],
        )?;
        match prepare_input(&batch)? {
            ModelInput::Sequence(seq) => {
                assert_eq!(seq.input_ids.to_vec2::<u32>()?, ids.to_vec2::<u32>()?);
                assert!(seq.labels.is_some());
            }
            ModelInput::Dense(_) => panic!("expected a sequence input"),
        }

        let short = Batch::new(
            RawInput::Sequence(vec![ids.clone(), ids.ones_like()?]),
            Tensor::new(&[0u32, 1], &device)?,
            vec!["rte".into(), "rte".into()],
        )?;
        assert!(prepare_input(&short).is_err());
        Ok(())
    }

    #[test]
    fn test_learning_steps_schedule() -> Result<()> {
        let device = Device::Cpu;
        let mut agent = Agent::new(single_head_config())?;
        let mut loader = separable_loader(&device)?;

        let metric = agent.learn_batch("All", &mut loader, None)?;
        assert!(metric.is_finite());
        assert_eq!(agent.scheduler().step_count(), 4);
        // epochs 2 and 3 run past the first milestone
        assert!((agent.optimizer().learning_rate() - 0.01).abs() < 1e-12);
        assert!(agent.is_training());
        Ok(())
    }

    #[test]
    fn test_validation_restores_mode() -> Result<()> {
        let device = Device::Cpu;
        let mut agent = Agent::new(single_head_config())?;
        let mut loader = separable_loader(&device)?;

        agent.train();
        let acc = agent.validation("All", &mut loader)?;
        assert!((0.0..=100.0).contains(&acc));
        assert!(agent.is_training());

        agent.eval();
        agent.validation("All", &mut loader)?;
        assert!(!agent.is_training());
        assert_eq!(agent.scheduler().step_count(), 0);
        Ok(())
    }

    #[test]
    fn test_incremental_class_logging() -> Result<()> {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let mut agent = Agent::new(single_head_config())?
            .with_log_sink(Box::new(move |l: &str| sink.lock().unwrap().push(l.to_string())));

        assert_eq!(agent.add_valid_output_dim(1), 1);
        assert_eq!(agent.valid_out_dim(), ValidOutDim::Dims(1));
        let lines = lines.lock().unwrap();
        assert_eq!(lines[0], "Incremental class: Old valid output dimension: ALL");
        assert_eq!(lines[1], "Incremental class: New Valid output dimension: 1");
        Ok(())
    }

    #[test]
    fn test_reset_optimizer_announces_itself() -> Result<()> {
        let device = Device::Cpu;
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let mut agent = Agent::new(AgentConfig { schedule: vec![1], ..single_head_config() })?
            .with_log_sink(Box::new(move |l: &str| sink.lock().unwrap().push(l.to_string())));
        agent.set_reset_optimizer(true);

        agent.learn_batch("All", &mut separable_loader(&device)?, None)?;
        agent.learn_batch("All", &mut separable_loader(&device)?, None)?;

        let lines = lines.lock().unwrap();
        assert_eq!(lines.iter().filter(|l| *l == "Optimizer is reset!").count(), 2);
        // a fresh scheduler is stepped once per call
        assert_eq!(agent.scheduler().step_count(), 1);
        Ok(())
    }

    #[test]
    fn test_learn_stream_is_unimplemented() -> Result<()> {
        let mut agent = Agent::new(single_head_config())?;
        let x = Tensor::zeros((1, 2), DType::F32, &Device::Cpu)?;
        let y = Tensor::zeros(1, DType::U32, &Device::Cpu)?;
        assert!(matches!(agent.learn_stream(&x, &y), Err(Error::Unimplemented(_))));
        Ok(())
    }

    #[test]
    fn test_count_parameter() -> Result<()> {
        let agent = Agent::new(single_head_config())?;
        // 2*8 + 8 hidden, 8*2 + 2 head
        assert_eq!(agent.count_parameter(), 42);
        Ok(())
    }
}
