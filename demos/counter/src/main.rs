use std::rc::Rc;

use mtor_core::prelude::*;
use mtor_devtools::{Inspector, dump};

fn counter() -> ModelDef {
    ModelDef::new()
        .field("count", 0)
        .method("increment", |this, _| {
            let n = this.get_as::<i64>("count").unwrap_or(0);
            this.set("count", n + 1);
            Value::Null
        })
        .on_before_reset(|this| log::info!("counter: resetting from {:?}", this.get("count")))
}

fn coalescing(registry: &Registry) -> anyhow::Result<()> {
    let counter = registry.register("counter", counter());
    let view = registry.bind(&counter)?;
    view.subscribe(|f| log::info!("counter view re-rendered: {}", Value::Object(f.clone())));

    for _ in 0..3 {
        view.call("increment", vec![])?;
    }
    registry.flush();
    log::info!("after one turn: count = {:?}", view.get("count"));
    view.unbind();
    Ok(())
}

fn wiring(registry: &Registry) -> anyhow::Result<()> {
    let a = registry.register("a", ModelDef::new().field("value", 1));
    registry.register("b", ModelDef::new().inject("aValue", &a));
    log::info!("b.aValue = {:?}", registry.state("b").map(|b| b.get("aValue").cloned()));

    registry.set_data("a", fields(json!({"value": 2})))?;
    registry.flush();
    log::info!("b.aValue = {:?}", registry.state("b").map(|b| b.get("aValue").cloned()));
    Ok(())
}

fn remount(registry: &Registry, clock: &ManualClock) -> anyhow::Result<()> {
    let grace = registry.config().reset_grace();
    let mount = |label: &'static str| {
        let scope = Scope::new();
        let view = scope.run(|| {
            use_init_model(registry, "counter", |_| log::info!("{label}: init ran"), true)
        })?;
        anyhow::Ok((scope, view))
    };

    let (scope, view) = mount("first mount")?;
    view.set("count", 7);
    scope.dispose();

    clock.advance(grace / 2);
    registry.tick();
    let (scope, view) = mount("quick remount")?;
    log::info!("quick remount kept count = {:?}", view.get("count"));
    scope.dispose();

    clock.advance(grace * 2);
    registry.tick();
    let (scope, view) = mount("late remount")?;
    log::info!("late remount sees count = {:?}", view.get("count"));
    scope.dispose();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match std::env::var("MTOR_CONFIG") {
        Ok(json) => RegistryConfig::from_json(&json)?,
        Err(_) => RegistryConfig::default(),
    };
    let clock = ManualClock::new();
    let registry = Registry::with_parts(
        config,
        Rc::new(LocalBus::new()),
        Rc::new(Scheduler::with_clock(clock.clone())),
    );

    coalescing(&registry)?;
    let mut inspector = Inspector::attach(&registry);
    wiring(&registry)?;
    for ns in registry.namespaces() {
        inspector.watch(&ns);
    }
    remount(&registry, &clock)?;

    for line in inspector.summary_lines() {
        log::info!("{line}");
    }
    println!("{}", dump(&registry));
    Ok(())
}
