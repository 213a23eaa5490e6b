use log::info;
use machine_learning::{
    arch::Classifier,
    optimization::{Adadelta, GradientDescent, Optimizer},
    persistence,
};

use crate::{
    Result, RunConfig, WorkerContext,
    collective::Collective,
    config::OptimizerConfig,
    data::{AugmentConfig, Augmenter, BatchGenerator, LabelTable, ShardSpec, StepPlan, train_test_split},
    publish::RunRecord,
    training::{Checkpoint, Fitted, ReduceLrOnPlateau, Trainer, Warmup},
};

/// The validation stream draws from its own seed, away from the training stream's.
const VALIDATION_SEED_OFFSET: u64 = 1 << 32;

/// What a rank ends a job with.
#[derive(Debug)]
pub struct JobOutcome {
    pub fitted: Fitted,
    pub plan: StepPlan,
    /// Only the coordinator publishes a record.
    pub record: Option<RunRecord>,
}

/// Runs one rank of a training job from loading the label table to publishing the artifacts.
///
/// Every rank derives the same split on its own, trains on its own shard of it and takes part
/// in every collective. Files are only written by the coordinator.
pub async fn run_job<C: Collective>(
    cfg: &RunConfig,
    ctx: &WorkerContext,
    collective: &mut C,
) -> Result<JobOutcome> {
    cfg.validate()?;

    let table = LabelTable::from_path(&cfg.file_categories)?;
    let classes = table.class_indices()?;

    if ctx.is_coordinator {
        info!(
            data_path:? = cfg.data_path,
            categories_map = cfg.categories_map.as_str(),
            file_categories:? = cfg.file_categories;
            "loading dataset"
        );
        info!(samples = table.len(); "label table loaded");
        for (category, count) in table.value_counts() {
            info!(category = category.as_str(), count; "category count");
        }
        info!(classes:? = classes; "class indices");
    }

    let split = train_test_split(&table, cfg.test_size, cfg.random_state)?;
    let plan = split.step_plan(cfg.batch_size)?;
    info!(
        train = split.train.len(),
        validation = split.validation.len(),
        steps_per_epoch = plan.steps_per_epoch,
        validation_steps = plan.validation_steps;
        "dataset split"
    );

    let classifier = build_classifier(cfg)?;
    let optimizer = build_optimizer(cfg, ctx, classifier.trainable_size());

    let shard = ShardSpec::from(ctx);
    let seed = cfg.random_state.wrapping_add(ctx.rank as u64);
    let train = BatchGenerator::new(
        &split.train,
        shard.range(split.train.len()),
        &cfg.data_path,
        &classes,
        Augmenter::new(
            AugmentConfig::training(),
            cfg.image_width,
            cfg.image_height,
            cfg.image_channels,
        ),
        cfg.batch_size,
        seed,
    )?;
    let validation = BatchGenerator::new(
        &split.validation,
        shard.range(split.validation.len()),
        &cfg.data_path,
        &classes,
        Augmenter::new(
            AugmentConfig::validation(),
            cfg.image_width,
            cfg.image_height,
            cfg.image_channels,
        ),
        cfg.batch_size,
        seed.wrapping_add(VALIDATION_SEED_OFFSET),
    )?;

    let verbose = ctx.is_coordinator;
    let mut trainer = Trainer::new(&mut *collective, optimizer, plan, cfg.epochs, verbose)
        .with_callback(Warmup::new(
            cfg.learning_rate,
            ctx.world_size,
            cfg.warmup_epochs,
            verbose,
        ))
        .with_callback(ReduceLrOnPlateau::new(
            cfg.plateau_patience,
            cfg.plateau_factor,
            verbose,
        ));
    if ctx.is_coordinator {
        trainer = trainer.with_callback(Checkpoint::new(&cfg.checkpoints_dir));
    }

    let fitted = trainer.fit(classifier, train, validation).await?;
    info!(
        steps = fitted.metrics.steps,
        samples = fitted.metrics.samples,
        compute_ms = fitted.metrics.compute_time.as_millis() as u64,
        reduce_ms = fitted.metrics.reduce_time.as_millis() as u64,
        eval_ms = fitted.metrics.eval_time.as_millis() as u64;
        "training finished"
    );

    let record = match ctx.publisher(cfg) {
        Some(publisher) => Some(publisher.publish(ctx, &fitted.classifier, &fitted.history)?),
        None => None,
    };

    // No rank leaves before the artifacts are out.
    collective.barrier().await?;

    Ok(JobOutcome {
        fitted,
        plan,
        record,
    })
}

/// A freshly initialized classifier, with the pretrained backbone if there is one.
fn build_classifier(cfg: &RunConfig) -> Result<Classifier> {
    let mut classifier = Classifier::new(cfg.architecture())?;
    classifier.initialize(cfg.random_state)?;

    if let Some(path) = &cfg.backbone.weights {
        persistence::load_backbone(path, &mut classifier)?;
        info!(path:? = path; "pretrained backbone loaded");
    }

    Ok(classifier)
}

/// The local optimizer, its rate scaled by the world size.
fn build_optimizer(cfg: &RunConfig, ctx: &WorkerContext, len: usize) -> Box<dyn Optimizer + Send> {
    let lr = cfg.learning_rate * ctx.world_size as f32;
    match cfg.optimizer {
        OptimizerConfig::Adadelta => Box::new(Adadelta::new(len, lr)),
        OptimizerConfig::GradientDescent { momentum } => {
            Box::new(GradientDescent::new(len, lr, momentum))
        }
    }
}
