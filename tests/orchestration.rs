//! End-to-end orchestration scenarios: linear and parallel runs, failure
//! containment, stop/resume, nested groups, and progress aggregation.

use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskflow::{
    Builder, Event, ExecutionMode, FlowState, GroupConfig, ManagerConfig, Status, TaskBuilder,
    TaskConfig, TaskManager, create_group, create_task,
};

fn value_builder(name: &str, value: Value) -> TaskBuilder {
    create_task(TaskConfig::new(name, move |_ctx| {
        let value = value.clone();
        async move { Ok(value) }
    }))
}

fn echo_builder(name: &str) -> TaskBuilder {
    create_task(TaskConfig::new(name, |ctx| async move {
        Ok(ctx.data().clone())
    }))
}

#[tokio::test]
async fn linear_run_collects_results() {
    let one = value_builder("one", json!(1));
    let upstream = one.clone();
    let two = create_task(TaskConfig::new("two", move |ctx| {
        let upstream = upstream.clone();
        async move {
            // pull the predecessor's result through the bound query
            let prior = ctx.query()?.get_result(&upstream)?;
            assert_eq!(prior, json!(1));
            Ok(json!(2))
        }
    }));

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_tasks(vec![
        one.build(json!(null)).into(),
        two.build(json!(null)).into(),
    ]);
    manager.start(false).await.unwrap();

    assert_eq!(manager.status(), Status::Success);
    assert_eq!(manager.progress(), 1.0);
    assert_eq!(manager.query().get_result(&one).unwrap(), json!(1));
    assert_eq!(manager.query().get_last_result(&two).unwrap(), json!(2));
    assert_eq!(manager.completed_count(), 2);
}

#[tokio::test]
async fn failing_task_aborts_the_run() {
    let ok = value_builder("ok", json!(1));
    let boom = create_task(TaskConfig::new("boom", |_ctx| async move {
        Err(anyhow::anyhow!("boom"))
    }));
    let after = value_builder("after", json!(3));

    let manager = TaskManager::new(ManagerConfig::default());
    let third = after.build(json!(null));
    manager.add_tasks(vec![
        ok.build(json!(null)).into(),
        boom.build(json!(null)).into(),
        third.clone().into(),
    ]);

    let failures = Arc::new(Mutex::new(Vec::new()));
    let sink = failures.clone();
    manager.events().subscribe(move |event| {
        if let Event::Fail(error) = event {
            sink.lock().unwrap().push(error.to_string());
        }
    });

    let err = manager.start(false).await.unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert_eq!(manager.status(), Status::Failed);
    // only the first two ever moved out of pending
    assert_eq!(manager.completed_count() + manager.active_count(), 2);
    assert_eq!(manager.pending_count(), 1);
    assert_eq!(third.status(), Status::Idle);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("boom"));
    drop(failures);

    // resuming a failed run requires force
    manager.start(false).await.unwrap();
    assert_eq!(manager.status(), Status::Failed);
    manager.start(true).await.unwrap();
    assert_eq!(manager.status(), Status::Success);
    assert_eq!(manager.completed_count(), 3);
    assert_eq!(third.status(), Status::Success);
}

#[tokio::test]
async fn continue_on_error_tolerates_failures() {
    let ok = echo_builder("ok");
    let boom = create_task(TaskConfig::new("boom", |_ctx| async move {
        Err(anyhow::anyhow!("boom"))
    }));

    let manager = TaskManager::new(ManagerConfig {
        continue_on_error: true,
        ..ManagerConfig::default()
    });
    manager.add_tasks(vec![
        ok.build(json!(1)).into(),
        boom.build(json!(null)).into(),
        ok.build(json!(3)).into(),
    ]);
    manager.start(false).await.unwrap();

    assert_eq!(manager.status(), Status::Success);
    assert_eq!(manager.completed_count(), 3);
    // the failed task stays visible with its error recorded
    let failed = manager.query().get(&boom).unwrap();
    assert_eq!(failed.status(), Status::Failed);
    // only the successful builder's results, no placeholder for the failure
    assert_eq!(
        manager.query().get_results(&ok).unwrap(),
        vec![json!(1), json!(3)]
    );
}

#[tokio::test(start_paused = true)]
async fn parallel_batch_starts_together() {
    let sleeper = create_task(TaskConfig::new("sleeper", |ctx| async move {
        let ms = ctx.data().as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(ms))
    }));

    let manager = TaskManager::new(ManagerConfig {
        mode: ExecutionMode::Parallel,
        ..ManagerConfig::default()
    });
    manager.add_tasks(vec![
        sleeper.build(json!(50)).into(),
        sleeper.build(json!(100)).into(),
        sleeper.build(json!(150)).into(),
    ]);

    let moves = Arc::new(Mutex::new(Vec::new()));
    let sink = moves.clone();
    manager.events().subscribe(move |event| {
        if let Event::Transition(transition) = event {
            match transition.to {
                Some(FlowState::Active) => sink.lock().unwrap().push("active"),
                Some(FlowState::Completed) => sink.lock().unwrap().push("completed"),
                _ => {}
            }
        }
    });

    let started = tokio::time::Instant::now();
    manager.start(false).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(manager.status(), Status::Success);
    assert_eq!(manager.completed_count(), 3);
    // the whole batch activates before anything completes
    let moves = moves.lock().unwrap();
    assert_eq!(
        *moves,
        vec!["active", "active", "active", "completed", "completed", "completed"]
    );
    // concurrent: bounded by the slowest sleeper, not the sum
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn parallel_failure_waits_for_the_batch() {
    let slow_ok = create_task(TaskConfig::new("slow-ok", |_ctx| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(json!("late"))
    }));
    let fast_fail = create_task(TaskConfig::new("fast-fail", |_ctx| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Err(anyhow::anyhow!("early loss"))
    }));

    let manager = TaskManager::new(ManagerConfig {
        mode: ExecutionMode::Parallel,
        ..ManagerConfig::default()
    });
    let survivor = slow_ok.build(json!(null));
    manager.add_tasks(vec![survivor.clone().into(), fast_fail.build(json!(null)).into()]);

    let err = manager.start(false).await.unwrap_err();
    assert!(err.to_string().contains("early loss"));
    assert_eq!(manager.status(), Status::Failed);
    // already-started concurrent work was awaited, not abandoned
    assert_eq!(survivor.status(), Status::Success);
    assert_eq!(manager.completed_count(), 2);
}

#[tokio::test]
async fn stop_request_halts_after_current_task() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let slow = create_task(TaskConfig::new("slow", move |_ctx| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!("done"))
        }
    }));

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_tasks(vec![
        slow.build(json!(null)).into(),
        slow.build(json!(null)).into(),
    ]);

    let runner = manager.clone();
    let handle = tokio::spawn(async move { runner.start(false).await });
    tokio::time::sleep(Duration::from_millis(30)).await;
    manager.stop();
    handle.await.unwrap().unwrap();

    // the in-flight task finished, the second never started
    assert_eq!(manager.status(), Status::Stopped);
    assert_eq!(manager.completed_count(), 1);
    assert_eq!(manager.pending_count(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // resume picks up the queue without re-running the first task
    manager.start(false).await.unwrap();
    assert_eq!(manager.status(), Status::Success);
    assert_eq!(manager.completed_count(), 2);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn nested_group_reads_siblings_via_parent_query() {
    let seed = value_builder("seed", json!(10));
    let upstream = seed.clone();
    let consume = create_task(TaskConfig::new("consume", move |ctx| {
        let upstream = upstream.clone();
        async move {
            let base = ctx.parent_query()?.get_result(&upstream)?;
            let offset = ctx.data().as_u64().unwrap_or(0);
            Ok(json!(base.as_u64().unwrap_or(0) + offset))
        }
    }));

    let stage = create_group(GroupConfig::new("stage", ExecutionMode::Linear));
    let group = stage.build(json!(null)).unwrap();
    group.add_task(consume.build(json!(5)));

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_tasks(vec![seed.build(json!(null)).into(), group.clone().into()]);
    manager.start(false).await.unwrap();

    assert_eq!(manager.status(), Status::Success);
    assert_eq!(group.status(), Status::Success);
    assert_eq!(group.query().get_result(&consume).unwrap(), json!(15));
    // the group itself is findable in the manager by its builder identity
    assert!(stage.is(&manager.query().get(&stage).unwrap()));
}

#[tokio::test]
async fn doubly_nested_group_runs_on_a_spawned_task() {
    let leaf = value_builder("leaf", json!(1));

    let inner_builder = create_group(GroupConfig::new("inner", ExecutionMode::Linear));
    let inner = inner_builder.build(json!(null)).unwrap();
    inner.add_task(leaf.build(json!(null)));

    let outer_builder = create_group(GroupConfig::new("outer", ExecutionMode::Linear));
    let outer = outer_builder.build(json!(null)).unwrap();
    outer.add_task(inner.clone());

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_task(outer.clone());

    // spawning requires the whole run future, nested groups included, to be Send
    let runner = manager.clone();
    let handle = tokio::spawn(async move { runner.start(false).await });
    handle.await.unwrap().unwrap();

    assert_eq!(manager.status(), Status::Success);
    assert_eq!(outer.status(), Status::Success);
    assert_eq!(inner.status(), Status::Success);
    assert_eq!(inner.query().get_result(&leaf).unwrap(), json!(1));
}

#[tokio::test]
async fn member_progress_percolates_upward() {
    let stepper = create_task(TaskConfig::new("stepper", |ctx| async move {
        ctx.set_progress(0.5);
        Ok(json!(null))
    }));

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_tasks(vec![
        stepper.build(json!(null)).into(),
        stepper.build(json!(null)).into(),
    ]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    manager.events().subscribe(move |event| {
        if let Event::Progress(value) = event {
            sink.lock().unwrap().push(*value);
        }
    });

    manager.start(false).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0.25));
    assert_eq!(seen.last(), Some(&1.0));
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn interleaved_builders_keep_insertion_order() {
    let wanted = echo_builder("wanted");
    let noise = echo_builder("noise");

    let manager = TaskManager::new(ManagerConfig::default());
    manager.add_tasks(vec![
        wanted.build(json!("a")).into(),
        noise.build(json!("x")).into(),
        wanted.build(json!("b")).into(),
        noise.build(json!("y")).into(),
        wanted.build(json!("c")).into(),
    ]);
    manager.start(false).await.unwrap();

    let matches = manager.query().get_all(&wanted).unwrap();
    let order: Vec<Value> = matches.iter().filter_map(|e| e.result()).collect();
    assert_eq!(order, vec![json!("a"), json!("b"), json!("c")]);
}
