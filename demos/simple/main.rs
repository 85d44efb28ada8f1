use togglefox::{
    events::LoggingEventPublisher, Environment, EvaluationContext, InMemoryCache,
    InMemoryFlagRepository, RolloutStrategy, ServiceConfig,
};

pub fn main() -> togglefox::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::new().default_filter_or("togglefox=info"))
        .init();

    let service = ServiceConfig::new(InMemoryFlagRepository::new())
        .cache(InMemoryCache::new())
        .event_publisher(LoggingEventPublisher)
        .to_service();

    let environment = Environment::production();
    let flag = service.create_flag(
        "new-checkout",
        "Rework of the checkout page",
        environment.clone(),
        RolloutStrategy::percentage(25)?,
    )?;
    service.enable_flag(flag.id())?;

    for subject in ["alice", "bob", "carol", "dave"] {
        let result = service.evaluate(
            "new-checkout",
            &environment,
            &EvaluationContext::for_subject(subject),
        )?;
        println!("{subject}: {} ({})", result.is_enabled(), result.reason());
    }

    // Roll out to everyone. The cached flag is evicted, so the next evaluation sees the change.
    service.update_strategy(flag.id(), RolloutStrategy::percentage(100)?)?;
    let result = service.evaluate(
        "new-checkout",
        &environment,
        &EvaluationContext::for_subject("alice"),
    )?;
    println!("alice after full rollout: {}", result.is_enabled());

    Ok(())
}
