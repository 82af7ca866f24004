//! Behavioural tests for the dispatch facade: round-robin sampling,
//! caching, pipeline buffering, nested blocking and error handling.

use anyhow::{bail, Result};
use autopick_engine::{
    call_site, stage_fn, Alternative, EngineError, ProblemSize, Runtime, TunedBuilder,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

type Log = Rc<RefCell<Vec<usize>>>;

fn counting_registry(
    runtime: &Runtime,
    alternatives: usize,
    rounds: usize,
) -> Result<(autopick_engine::Tuned<usize, usize>, Log)> {
    let log: Log = Rc::new(RefCell::new(Vec::new()));
    let mut builder = TunedBuilder::<usize, usize>::new("op")
        .rounds(rounds)
        .prune_after_round(rounds)
        .classifier(|n: &usize| ProblemSize::dims(&[*n]));
    for index in 0..alternatives {
        let log = Rc::clone(&log);
        builder = builder.single(format!("alt{index}"), move |n: &usize| {
            log.borrow_mut().push(index);
            Ok(*n)
        });
    }
    Ok((builder.build(runtime)?, log))
}

#[test]
fn dispatch_cycles_round_robin_until_budget() -> Result<()> {
    let runtime = Runtime::new();
    let (op, log) = counting_registry(&runtime, 3, 2)?;

    let site = call_site!();
    for _ in 0..6 {
        op.invoke(site, &64)?;
    }
    assert_eq!(*log.borrow(), vec![0, 1, 2, 0, 1, 2]);
    assert!(op.best_found(&64));
    Ok(())
}

#[test]
fn cached_selection_bypasses_sampling() -> Result<()> {
    let runtime = Runtime::new();
    let (op, _log) = counting_registry(&runtime, 2, 1)?;
    let site = call_site!();
    for _ in 0..2 {
        op.invoke(site, &32)?;
    }

    let size = ProblemSize::dims(&[32]);
    assert!(op.best_found(&32));
    let counts = op.sample_counts(&size);
    assert_eq!(counts.iter().sum::<usize>(), 2);

    for _ in 0..10 {
        op.invoke(site, &32)?;
    }
    assert_eq!(op.sample_counts(&size), counts);
    Ok(())
}

#[test]
fn slow_alternatives_are_pruned_against_live_traffic() -> Result<()> {
    let runtime = Runtime::new();
    let op = TunedBuilder::<usize, ()>::new("sleepy")
        .rounds(10)
        .pruning_speedup(4.0)
        .prune_after_round(1)
        .classifier(|_: &usize| ProblemSize::label("fixed"))
        .single("slow", |_: &usize| {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        })
        .single("fast", |_: &usize| {
            thread::sleep(Duration::from_millis(1));
            Ok(())
        })
        .build(&runtime)?;

    let site = call_site!();
    for _ in 0..4 {
        op.invoke(site, &0)?;
    }

    let size = ProblemSize::label("fixed");
    assert_eq!(op.selected_name(&size).as_deref(), Some("fast"));
    assert!(op.speedup(&size).expect("converged speedup") > 4.0);
    // Only one full round was needed before pruning converged.
    assert_eq!(op.sample_counts(&size), vec![1, 1]);
    Ok(())
}

#[test]
fn problem_sizes_keep_independent_cursors() -> Result<()> {
    let runtime = Runtime::new();
    let (op, log) = counting_registry(&runtime, 2, 4)?;
    let site = call_site!();

    op.invoke(site, &8)?;
    op.invoke(site, &9)?;
    op.invoke(site, &8)?;
    op.invoke(site, &9)?;
    assert_eq!(*log.borrow(), vec![0, 0, 1, 1]);

    assert_eq!(
        op.sample_counts(&ProblemSize::dims(&[8])),
        op.sample_counts(&ProblemSize::dims(&[9]))
    );
    Ok(())
}

#[test]
fn pipeline_ignores_out_of_order_stage_cycles() -> Result<()> {
    let runtime = Runtime::new();
    let stage = || stage_fn(|_: &()| Ok(()));
    let pipe = TunedBuilder::<(), ()>::new("pipe")
        .stages(2)
        .classifier(|_: &()| ProblemSize::label("only"))
        .alternative(Alternative::pipeline("a", vec![stage(), stage()]))
        .alternative(Alternative::pipeline("b", vec![stage(), stage()]))
        .build(&runtime)?;

    let size = ProblemSize::label("only");

    // Terminal stage with no stage-0 timing in the cycle: discarded.
    pipe.invoke_stage(call_site!(), 1, &())?;
    assert_eq!(pipe.sample_counts(&size), vec![0, 0]);

    // A complete cycle produces exactly one pipeline sample.
    pipe.invoke_stage(call_site!(), 0, &())?;
    pipe.invoke_stage(call_site!(), 1, &())?;
    assert_eq!(pipe.sample_counts(&size), vec![1, 0]);
    Ok(())
}

#[test]
fn outer_samples_wait_for_inner_convergence() -> Result<()> {
    let runtime = Runtime::new();
    let inner = Rc::new(
        TunedBuilder::<usize, usize>::new("inner")
            .rounds(1)
            .prune_after_round(1)
            .classifier(|n: &usize| ProblemSize::dims(&[*n]))
            .single("a", |n: &usize| Ok(*n))
            .single("b", |n: &usize| Ok(*n + 1))
            .build(&runtime)?,
    );

    let inner_handle = Rc::clone(&inner);
    let outer = TunedBuilder::<usize, usize>::new("outer")
        .rounds(3)
        .prune_after_round(3)
        .classifier(|n: &usize| ProblemSize::dims(&[*n]))
        .single("wrapped", move |n: &usize| {
            inner_handle.invoke(call_site!(), n)
        })
        .build(&runtime)?;

    let size = ProblemSize::dims(&[8]);
    let site = call_site!();

    // Inner is still exploring: the outer timing is contaminated and
    // must not be recorded.
    outer.invoke(site, &8)?;
    assert_eq!(outer.sample_counts(&size), vec![0]);
    assert_eq!(inner.sample_counts(&size).iter().sum::<usize>(), 1);

    // Inner converges during this call, unblocking the outer node.
    outer.invoke(site, &8)?;
    assert!(inner.best_found(&8));
    assert_eq!(outer.sample_counts(&size), vec![1]);
    Ok(())
}

#[test]
fn alternatives_may_reenter_their_own_registry() -> Result<()> {
    // An adaptive alternative can split off a fresh sub-problem on
    // every call, re-entering its own registry both while its size is
    // still exploring and after its winner is cached.
    let runtime = Runtime::new();
    let slot: Rc<RefCell<Option<Rc<autopick_engine::Tuned<usize, usize>>>>> =
        Rc::new(RefCell::new(None));
    let next_split = Rc::new(RefCell::new(100usize));

    let inner_slot = Rc::clone(&slot);
    let splits = Rc::clone(&next_split);
    let op = Rc::new(
        TunedBuilder::<usize, usize>::new("adaptive")
            .rounds(1)
            .prune_after_round(1)
            .classifier(|n: &usize| ProblemSize::dims(&[*n]))
            .single("split", move |n: &usize| {
                if *n >= 100 {
                    return Ok(*n);
                }
                let sub = {
                    let mut next = splits.borrow_mut();
                    *next += 1;
                    *next
                };
                let op = inner_slot.borrow().clone().expect("registry installed");
                op.invoke(call_site!(), &sub)?;
                Ok(*n)
            })
            .build(&runtime)?,
    );
    *slot.borrow_mut() = Some(Rc::clone(&op));

    let site = call_site!();
    let size = ProblemSize::dims(&[5]);

    // Exploring path: the sub-problem converges first, unblocking the
    // outer sample.
    op.invoke(site, &5)?;
    assert!(op.best_found(&5));
    assert_eq!(op.sample_counts(&ProblemSize::dims(&[101])), vec![1]);

    // Cached path: dispatching to the stored winner must still let it
    // open a brand-new problem size in the same registry.
    op.invoke(site, &5)?;
    assert_eq!(op.selected_index(&size), Some(0));
    assert_eq!(op.sample_counts(&ProblemSize::dims(&[102])), vec![1]);
    Ok(())
}

#[test]
fn force_first_bypasses_tuning_entirely() -> Result<()> {
    let runtime = Runtime::new();
    runtime.force_first_alternative();
    let (op, log) = counting_registry(&runtime, 3, 2)?;
    let site = call_site!();

    for _ in 0..8 {
        op.invoke(site, &16)?;
    }
    assert!(log.borrow().iter().all(|&index| index == 0));
    assert!(!op.best_found(&16));
    assert_eq!(
        op.sample_counts(&ProblemSize::dims(&[16])),
        vec![0, 0, 0]
    );
    Ok(())
}

#[test]
fn alternative_failure_leaves_state_untouched() -> Result<()> {
    let runtime = Runtime::new();
    let failing = Rc::new(RefCell::new(true));
    let flag = Rc::clone(&failing);
    let op = TunedBuilder::<usize, usize>::new("flaky")
        .rounds(2)
        .prune_after_round(2)
        .classifier(|n: &usize| ProblemSize::dims(&[*n]))
        .single("flaky", move |n: &usize| {
            if *flag.borrow() {
                bail!("kernel rejected input");
            }
            Ok(*n)
        })
        .single("steady", |n: &usize| Ok(*n))
        .build(&runtime)?;

    let size = ProblemSize::dims(&[4]);
    let site = call_site!();

    let err = op.invoke(site, &4).unwrap_err();
    assert!(err.to_string().contains("kernel rejected input"));
    assert_eq!(op.sample_counts(&size), vec![0, 0]);

    // The same alternative is retried on the next call with this
    // problem size.
    *failing.borrow_mut() = false;
    op.invoke(site, &4)?;
    assert_eq!(op.sample_counts(&size), vec![1, 0]);
    Ok(())
}

#[test]
fn stage_errors_surface_without_mutating_state() -> Result<()> {
    let runtime = Runtime::new();
    let stage = || stage_fn(|_: &()| Ok(()));
    let pipe = TunedBuilder::<(), ()>::new("pipe")
        .stages(2)
        .classifier(|_: &()| ProblemSize::label("only"))
        .alternative(Alternative::pipeline("a", vec![stage(), stage()]))
        .build(&runtime)?;

    let err = pipe.invoke_stage(call_site!(), 5, &()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::InvalidStage { stage: 5, .. })
    ));

    let err = pipe.invoke(call_site!(), &()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::StageRequired { .. })
    ));

    assert_eq!(
        pipe.sample_counts(&ProblemSize::label("only")),
        vec![0, 0]
    );
    Ok(())
}

#[test]
fn invalid_configurations_never_construct_a_registry() {
    let runtime = Runtime::new();

    let err = TunedBuilder::<(), ()>::new("pipe")
        .stages(2)
        .classifier(|_: &()| ProblemSize::label("x"))
        .alternative(Alternative::pipeline(
            "short",
            vec![stage_fn(|_: &()| Ok(()))],
        ))
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));

    let err = TunedBuilder::<(), ()>::new("flat")
        .classifier(|_: &()| ProblemSize::label("x"))
        .alternative(Alternative::pipeline(
            "pipeline",
            vec![stage_fn(|_: &()| Ok(())), stage_fn(|_: &()| Ok(()))],
        ))
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));

    let err = TunedBuilder::<(), ()>::new("op")
        .pruning_speedup(0.5)
        .classifier(|_: &()| ProblemSize::label("x"))
        .single("only", |_: &()| Ok(()))
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));

    let err = TunedBuilder::<(), ()>::new("op")
        .rounds(0)
        .classifier(|_: &()| ProblemSize::label("x"))
        .single("only", |_: &()| Ok(()))
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));

    let err = TunedBuilder::<(), ()>::new("empty")
        .classifier(|_: &()| ProblemSize::label("x"))
        .build(&runtime)
        .unwrap_err();
    assert!(matches!(err, EngineError::Configuration { .. }));
}
