#[cfg(test)]
mod tests {
    use crate::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use web_time::Duration;

    fn counter_def() -> ModelDef {
        ModelDef::new()
            .field("count", 0)
            .method("increment", |this, _| {
                let n = this.get_as::<i64>("count").unwrap_or(0);
                this.set("count", n + 1);
                Value::Null
            })
            .method("add", |this, args| {
                let by = args.first().and_then(Value::as_i64).unwrap_or(0);
                let n = this.get_as::<i64>("count").unwrap_or(0);
                this.set("count", n + by);
                json!(n + by)
            })
    }

    fn record(registry: &Registry, ns: &str) -> (Rc<RefCell<Vec<Snapshot>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let sub = registry.subscribe(ns, move |snap| s.borrow_mut().push(snap.clone()));
        (seen, sub)
    }

    fn manual_registry() -> (Registry, ManualClock) {
        let clock = ManualClock::new();
        let registry = Registry::with_parts(
            RegistryConfig::default(),
            Rc::new(LocalBus::new()),
            Rc::new(Scheduler::with_clock(clock.clone())),
        );
        (registry, clock)
    }

    #[test]
    fn test_counter_increments_coalesce_into_one_publish() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        let (seen, _sub) = record(&registry, "counter");
        let view = registry.bind(&counter).unwrap();

        for _ in 0..3 {
            view.call("increment", vec![]).unwrap();
        }
        assert!(seen.borrow().is_empty());

        registry.flush();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].get_as::<i64>("count"), Some(3));
        assert_eq!(view.get_as::<i64>("count"), Some(3));
    }

    #[test]
    fn test_method_results_come_back_through_the_bus() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        let view = registry.bind(&counter).unwrap();

        assert_eq!(view.call("add", vec![json!(5)]).unwrap(), json!(5));
        assert_eq!(registry.invoke("counter", "add", vec![json!(2)]).unwrap(), json!(7));
    }

    #[test]
    fn test_methods_can_call_each_other() {
        let registry = Registry::new();
        registry.register(
            "counter",
            counter_def().method("bump_twice", |this, _| {
                this.call("increment", vec![]).unwrap();
                this.call("increment", vec![]).unwrap();
                Value::Null
            }),
        );
        registry.invoke("counter", "bump_twice", vec![]).unwrap();
        registry.flush();
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(2));
    }

    #[test]
    fn test_unchanged_writes_never_publish() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        let (seen, _sub) = record(&registry, "counter");
        let view = registry.bind(&counter).unwrap();

        registry.set_field("counter", "count", 0).unwrap();
        registry.set_data("counter", fields(json!({"count": 0}))).unwrap();
        view.set("count", 0);
        registry.flush();

        assert!(seen.borrow().is_empty());
        assert_eq!(registry.state("counter").unwrap().revision(), 0);
    }

    #[test]
    fn test_wired_field_follows_provider() {
        let registry = Registry::new();
        let a = registry.register("a", ModelDef::new().field("value", 1));
        registry.register("b", ModelDef::new().field("own", true).inject("aValue", &a));

        let b = registry.state("b").unwrap();
        assert_eq!(b.get("aValue"), Some(&json!({"value": 1})));

        registry.set_data("a", fields(json!({"value": 2}))).unwrap();
        registry.flush();
        let b = registry.state("b").unwrap();
        assert_eq!(b.get("aValue"), Some(&json!({"value": 2})));
        assert_eq!(b.get("own"), Some(&json!(true)));
    }

    #[test]
    fn test_wiring_to_unregistered_provider_starts_null() {
        let registry = Registry::new();
        registry.register("b", ModelDef::new().inject("later", "a"));
        assert_eq!(registry.state("b").unwrap().get("later"), Some(&Value::Null));

        registry.register("a", ModelDef::new().field("x", 1));
        registry.set_field("a", "x", 2).unwrap();
        registry.flush();
        assert_eq!(registry.state("b").unwrap().get("later"), Some(&json!({"x": 2})));
    }

    #[test]
    fn test_reregistering_consumer_does_not_double_deliver() {
        let registry = Registry::new();
        registry.register("a", ModelDef::new().field("value", 1));
        let consumer = || ModelDef::new().inject("aValue", "a");
        registry.register("b", consumer());
        registry.register("b", consumer());
        registry.register("b", consumer());
        registry.flush();

        assert_eq!(registry.bus().listener_count(&registry.topics().update("a")), 1);

        let (seen, _sub) = record(&registry, "b");
        registry.set_data("a", fields(json!({"value": 9}))).unwrap();
        registry.flush();
        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].get("aValue"), Some(&json!({"value": 9})));
    }

    #[test]
    fn test_two_fields_wired_to_one_provider_both_update() {
        let registry = Registry::new();
        registry.register("a", ModelDef::new().field("n", 1));
        registry.register("b", ModelDef::new().inject("first", "a").inject("second", "a"));

        registry.set_field("a", "n", 2).unwrap();
        registry.flush();
        let b = registry.state("b").unwrap();
        assert_eq!(b.get("first"), Some(&json!({"n": 2})));
        assert_eq!(b.get("second"), Some(&json!({"n": 2})));
    }

    #[test]
    fn test_dropped_wire_is_unsubscribed_on_reload() {
        let registry = Registry::new();
        registry.register("a", ModelDef::new().field("n", 1));
        registry.register("b", ModelDef::new().inject("dep", "a"));
        registry.register("b", ModelDef::new());
        registry.flush();

        assert_eq!(registry.bus().listener_count(&registry.topics().update("a")), 0);
        registry.set_field("a", "n", 5).unwrap();
        registry.flush();
        // Preserved from before the reload, no longer updated.
        assert_eq!(registry.state("b").unwrap().get("dep"), Some(&json!({"n": 1})));
    }

    #[test]
    fn test_self_wiring_is_ignored() {
        let registry = Registry::new();
        registry.register("loop", ModelDef::new().field("x", 1).inject("me", "loop"));
        assert_eq!(registry.state("loop").unwrap().get("me"), None);
        assert!(registry.prototype("loop").unwrap().wiring().is_empty());
    }

    #[test]
    fn test_hot_reload_keeps_state_and_swaps_methods() {
        let registry = Registry::new();
        let created = Rc::new(Cell::new(0));
        let c = created.clone();
        let counter = registry.register("counter", counter_def().on_created(move |_| c.set(c.get() + 1)));
        let view = registry.bind(&counter).unwrap();
        view.call("add", vec![json!(5)]).unwrap();
        registry.flush();
        let first_generation = view.generation();

        let c = created.clone();
        registry.register(
            "counter",
            ModelDef::new()
                .field("count", 100)
                .field("step", 2)
                .method("decrement", |this, _| {
                    let n = this.get_as::<i64>("count").unwrap_or(0);
                    let step = this.get_as::<i64>("step").unwrap_or(1);
                    this.set("count", n - step);
                    Value::Null
                })
                .on_created(move |_| c.set(c.get() + 1)),
        );
        registry.flush();

        assert_eq!(created.get(), 1);
        let state = registry.state("counter").unwrap();
        assert_eq!(state.get_as::<i64>("count"), Some(5));
        assert_eq!(state.get_as::<i64>("step"), Some(2));
        assert!(view.generation() > first_generation);
        assert_eq!(view.get_as::<i64>("step"), Some(2));

        assert!(matches!(
            view.call("increment", vec![]),
            Err(MtorError::MethodNotFound { .. })
        ));
        assert_eq!(
            registry.bus().listener_count(&registry.topics().method("counter", "increment")),
            0
        );
        view.call("decrement", vec![]).unwrap();
        registry.flush();
        assert_eq!(view.get_as::<i64>("count"), Some(3));
    }

    #[test]
    fn test_hot_reload_routes_each_call_once() {
        let registry = Registry::new();
        let calls = Rc::new(Cell::new(0));
        let def = {
            let calls = calls.clone();
            move || {
                let calls = calls.clone();
                ModelDef::new().method("ping", move |_, _| {
                    calls.set(calls.get() + 1);
                    Value::Null
                })
            }
        };
        registry.register("m", def());
        registry.register("m", def());
        registry.invoke("m", "ping", vec![]).unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_hot_reload_restores_statics() {
        let registry = Registry::new();
        let first = registry.register("list", ModelDef::new().static_field("page_size", 20));
        first.set_static("page_size", 50);

        let second = registry.register(
            "list",
            ModelDef::new()
                .static_field("page_size", 10)
                .static_field("sortable", true),
        );
        assert_eq!(second.get_static("page_size"), Some(json!(50)));
        assert_eq!(second.get_static("sortable"), Some(json!(true)));
        assert_eq!(first.statics(), second.statics());
    }

    #[test]
    fn test_reset_rebuilds_defaults_and_fresh_wiring() {
        let registry = Registry::new();
        registry.register("a", ModelDef::new().field("v", 1));
        let order = Rc::new(RefCell::new(Vec::new()));
        let (o1, o2) = (order.clone(), order.clone());
        registry.register(
            "m",
            ModelDef::new()
                .field("count", 0)
                .inject("dep", "a")
                .on_before_clean(move |_| o1.borrow_mut().push("clean"))
                .on_before_reset(move |_| o2.borrow_mut().push("reset")),
        );
        registry.set_field("m", "count", 4).unwrap();
        registry.set_field("a", "v", 2).unwrap();
        registry.flush();

        let discarded = Rc::new(RefCell::new(None));
        let d = discarded.clone();
        registry.on_before_reset("m", move |prev| *d.borrow_mut() = prev.get_as::<i64>("count"));

        let (seen, _sub) = record(&registry, "m");
        registry.reset("m").unwrap();
        registry.reset("m").unwrap();

        let state = registry.state("m").unwrap();
        assert_eq!(state.get_as::<i64>("count"), Some(0));
        assert_eq!(state.get("dep"), Some(&json!({"v": 2})));
        assert_eq!(*order.borrow(), vec!["clean", "reset", "clean", "reset"]);
        assert_eq!(*discarded.borrow(), Some(4));
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(registry.bus().listener_count(&registry.topics().reset("m")), 0);
    }

    #[test]
    fn test_reset_without_hooks_is_fine() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        let view = registry.bind(&counter).unwrap();
        view.set("count", 3);
        view.reset().unwrap();
        assert_eq!(view.get_as::<i64>("count"), Some(0));
    }

    #[test]
    fn test_local_edits_reach_other_bindings_once() {
        let registry = Registry::new();
        let todo = registry.register("todo", ModelDef::new().field("title", "").field("done", false));
        let (seen, _sub) = record(&registry, "todo");
        let a = registry.bind(&todo).unwrap();
        let b = registry.bind(&todo).unwrap();
        let renders = Rc::new(Cell::new(0));
        let r = renders.clone();
        b.subscribe(move |_| r.set(r.get() + 1));

        a.update(|f| {
            f.insert("title".into(), json!("ship it"));
            f.insert("done".into(), json!(true));
        });

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(renders.get(), 1);
        assert_eq!(b.get("title"), Some(json!("ship it")));
        assert_eq!(registry.state("todo").unwrap().get("done"), Some(&json!(true)));
        registry.flush();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_local_edit_does_not_roll_back_pending_method_write() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def().field("label", ""));
        let view = registry.bind(&counter).unwrap();

        view.call("increment", vec![]).unwrap();
        view.set("label", "clicked");
        registry.flush();

        let state = registry.state("counter").unwrap();
        assert_eq!(state.get_as::<i64>("count"), Some(1));
        assert_eq!(state.get_as::<String>("label").as_deref(), Some("clicked"));
        assert_eq!(view.get_as::<i64>("count"), Some(1));
    }

    #[test]
    fn test_unbound_binding_stops_following() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        let view = registry.bind(&counter).unwrap();
        view.unbind();
        view.unbind();
        assert!(!view.is_bound());

        registry.set_data("counter", fields(json!({"count": 8}))).unwrap();
        assert_eq!(view.get_as::<i64>("count"), Some(0));
        view.set("count", 1);
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(8));
        assert_eq!(registry.bus().listener_count(&registry.topics().update("counter")), 0);
    }

    #[test]
    fn test_bind_requires_registration() {
        let registry = Registry::new();
        assert!(matches!(
            registry.bind("ghost"),
            Err(MtorError::NamespaceNotFound(ns)) if ns == "ghost"
        ));
        assert!(matches!(
            registry.invoke("ghost", "x", vec![]),
            Err(MtorError::NamespaceNotFound(_))
        ));
    }

    #[test]
    fn test_cleaned_method_topic_is_unrouted() {
        let registry = Registry::new();
        registry.register("counter", counter_def());
        registry.bus().clean(&registry.topics().method("counter", "increment"));
        assert!(matches!(
            registry.invoke("counter", "increment", vec![]),
            Err(MtorError::Unrouted { .. })
        ));
    }

    #[test]
    fn test_rebind_within_grace_window_skips_reset() {
        let (registry, clock) = manual_registry();
        let counter = registry.register("counter", counter_def());
        let inits = Rc::new(Cell::new(0));
        let resets = Rc::new(Cell::new(0));
        let r = resets.clone();
        registry.on_before_reset("counter", move |_| r.set(r.get() + 1));

        let i = inits.clone();
        let view = registry
            .bind_with_init(&counter, move |_| i.set(i.get() + 1), true)
            .unwrap();
        view.set("count", 7);
        view.unbind();

        clock.advance(Duration::from_millis(10));
        registry.tick();
        let i = inits.clone();
        let again = registry
            .bind_with_init(&counter, move |_| i.set(i.get() + 1), true)
            .unwrap();

        clock.advance(Duration::from_millis(50));
        registry.tick();

        assert_eq!(inits.get(), 1);
        assert_eq!(resets.get(), 0);
        assert_eq!(registry.scheduler().pending_timers(), 0);
        assert_eq!(again.get_as::<i64>("count"), Some(7));
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(7));
    }

    #[test]
    fn test_rebind_after_grace_window_resets() {
        let (registry, clock) = manual_registry();
        registry.register("a", ModelDef::new().field("v", 1));
        let m = registry.register("m", counter_def().inject("dep", "a"));

        let view = registry.bind_with_init(&m, |_| {}, true).unwrap();
        view.set("count", 7);
        registry.set_field("a", "v", 3).unwrap();
        registry.flush();
        view.unbind();

        clock.advance(Duration::from_millis(25));
        assert_eq!(registry.tick(), 1);

        let state = registry.state("m").unwrap();
        assert_eq!(state.get_as::<i64>("count"), Some(0));
        assert_eq!(state.get("dep"), Some(&json!({"v": 3})));

        let inits = Rc::new(Cell::new(0));
        let i = inits.clone();
        registry
            .bind_with_init(&m, move |_| i.set(i.get() + 1), true)
            .unwrap();
        assert_eq!(inits.get(), 1);
    }

    #[test]
    fn test_delayed_teardown_without_auto_reset_keeps_state() {
        let (registry, clock) = manual_registry();
        let counter = registry.register("counter", counter_def());
        let view = registry.bind_with_init(&counter, |_| {}, false).unwrap();
        view.set("count", 2);
        view.unbind();
        clock.advance(Duration::from_millis(30));
        registry.tick();
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(2));
        assert_eq!(registry.scheduler().pending_timers(), 0);
    }

    #[test]
    fn test_use_model_needs_a_scope() {
        let registry = Registry::new();
        let counter = registry.register("counter", counter_def());
        assert!(matches!(
            use_model(&registry, &counter),
            Err(MtorError::NoSetupScope(_))
        ));
        assert_eq!(registry.bus().listener_count(&registry.topics().update("counter")), 0);
    }

    #[test]
    fn test_scope_dispose_schedules_delayed_reset() {
        let (registry, clock) = manual_registry();
        let counter = registry.register("counter", counter_def());
        let mounted = Scope::new();
        let view = mounted
            .run(|| {
                use_init_model(
                    &registry,
                    &counter,
                    |b| {
                        b.set("count", 1);
                    },
                    true,
                )
            })
            .unwrap();
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(1));

        mounted.dispose();
        assert!(!view.is_bound());
        assert_eq!(registry.scheduler().pending_timers(), 1);
        clock.advance(Duration::from_millis(20));
        registry.tick();
        assert_eq!(registry.state("counter").unwrap().get_as::<i64>("count"), Some(0));
    }

    #[test]
    fn test_get_all_lists_every_namespace() {
        let registry = Registry::new();
        registry.register("b", ModelDef::new().field("x", 1));
        registry.register("a", ModelDef::new().field("y", 2));
        let all = registry.get_all();
        assert_eq!(all.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(all["a"].get("y"), Some(&json!(2)));
        assert_eq!(registry.namespaces(), ["a", "b"]);
    }

    #[test]
    fn test_custom_topic_prefix() {
        let registry = Registry::with_config(RegistryConfig {
            topic_prefix: "app:".into(),
            ..RegistryConfig::default()
        });
        let counter = registry.register("counter", counter_def());
        let _view = registry.bind(&counter).unwrap();
        assert_eq!(registry.bus().listener_count("app:counter"), 1);
        assert_eq!(registry.bus().listener_count("app:counter-function-increment"), 1);
    }
}
