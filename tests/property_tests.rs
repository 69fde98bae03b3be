//! Property-based tests for the pure transition function and the
//! interpreter's observable laws.
//!
//! These tests use proptest to verify the core invariants hold across
//! many randomly generated inputs.

use lattice::actions::{assign, cancel};
use lattice::{
    Event, Interpreter, InterpreterOptions, Machine, MachineDef, MachineOptions, SimulatedClock,
    StateDef, TransitionDef,
};
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq)]
struct Ctx {
    count: i64,
}

/// A small media-player machine exercised by every property below.
fn player() -> Machine<Ctx> {
    MachineDef::new("player")
        .context(Ctx { count: 0 })
        .initial("idle")
        .state(
            "idle",
            StateDef::new()
                .entry(lattice::actions::action("enter_idle"))
                .exit(lattice::actions::action("exit_idle"))
                .on("PLAY", "playing")
                .on(
                    "SELF",
                    TransitionDef::to("idle").action(lattice::actions::action("noop")),
                ),
        )
        .state(
            "playing",
            StateDef::new()
                .on("PAUSE", "paused")
                .on("STOP", "idle")
                .on(
                    "ADD",
                    TransitionDef::targetless().action(assign(|ctx: &Ctx, _: &Event| Ctx {
                        count: ctx.count + 1,
                    })),
                )
                .on(
                    "DOUBLE",
                    TransitionDef::targetless().action(assign(|ctx: &Ctx, _: &Event| Ctx {
                        count: ctx.count * 2,
                    })),
                ),
        )
        .state(
            "paused",
            StateDef::new().on("PLAY", "playing").on("STOP", "idle"),
        )
        .build(MachineOptions::default())
        .expect("definition is valid")
}

const KNOWN_EVENTS: [&str; 6] = ["PLAY", "PAUSE", "STOP", "ADD", "DOUBLE", "SELF"];
const VALUES: [&str; 3] = ["idle", "playing", "paused"];

prop_compose! {
    fn arbitrary_value()(index in 0..VALUES.len()) -> &'static str {
        VALUES[index]
    }
}

prop_compose! {
    fn arbitrary_known_event()(index in 0..KNOWN_EVENTS.len()) -> &'static str {
        KNOWN_EVENTS[index]
    }
}

fn arbitrary_unknown_event() -> impl Strategy<Value = String> {
    "[A-Z]{3,8}".prop_filter("must not collide with a handled event", |name| {
        !KNOWN_EVENTS.contains(&name.as_str())
    })
}

proptest! {
    #[test]
    fn unmatched_events_are_identity(value in arbitrary_value(), name in arbitrary_unknown_event()) {
        let machine = player();
        let state = machine.state_from(value).expect("valid value");
        let next = machine.transition(&state, name.as_str()).expect("transitions");
        prop_assert_eq!(&next.value, &state.value);
        prop_assert!(next.actions.is_empty());
        prop_assert!(!next.changed);
    }

    #[test]
    fn transition_is_deterministic(value in arbitrary_value(), name in arbitrary_known_event()) {
        let machine = player();
        let state = machine.state_from(value).expect("valid value");
        let a = machine.transition(&state, name).expect("transitions");
        let b = machine.transition(&state, name).expect("transitions");
        prop_assert_eq!(&a.value, &b.value);
        prop_assert_eq!(&a.context, &b.context);
        prop_assert_eq!(a.action_names(), b.action_names());
    }

    #[test]
    fn self_transitions_bracket_with_exit_and_entry(_seed in 0u8..4) {
        let machine = player();
        let state = machine.state_from("idle").expect("valid value");
        let next = machine.transition(&state, "SELF").expect("transitions");
        let names = next.action_names();
        prop_assert_eq!(names.first(), Some(&"exit_idle"));
        prop_assert_eq!(names.last(), Some(&"enter_idle"));
    }

    #[test]
    fn assigns_compose_across_steps(ops in prop::collection::vec(prop::bool::ANY, 0..12)) {
        let machine = player();
        let mut state = machine.transition_from("idle", "PLAY").expect("reaches playing");
        let mut expected = state.context.count;
        for double in &ops {
            let event = if *double { "DOUBLE" } else { "ADD" };
            expected = if *double { expected * 2 } else { expected + 1 };
            state = machine.transition(&state, event).expect("transitions");
        }
        prop_assert_eq!(state.context.count, expected);
    }

    #[test]
    fn preview_matches_the_pure_transition(
        warmup in prop::collection::vec(arbitrary_known_event(), 0..6),
        probe in arbitrary_known_event(),
    ) {
        let machine = Arc::new(player());
        let service = Interpreter::new(Arc::clone(&machine));
        service.start().expect("starts");
        for event in warmup {
            service.send(event).expect("sends");
        }
        let before = service.state();
        let preview = service.next_state(probe).expect("previews");
        let pure = machine.transition(&before, probe).expect("transitions");
        prop_assert_eq!(&preview.value, &pure.value);
        // The preview must not move the interpreter.
        prop_assert_eq!(&service.state().value, &before.value);
    }

    #[test]
    fn cancelled_delays_never_deliver(delay in 1u64..100, slack in 0u64..50) {
        let machine = MachineDef::new("pinger")
            .context(Ctx { count: 0 })
            .initial("waiting")
            .state(
                "waiting",
                StateDef::new()
                    .entry(lattice::actions::send("PING").delay(delay).id("PING"))
                    .on("PING", "pinged")
                    .on("ABORT", TransitionDef::targetless().action(cancel("PING"))),
            )
            .state("pinged", StateDef::new())
            .build(MachineOptions::default())
            .expect("definition is valid");

        let clock = Arc::new(SimulatedClock::new());
        let service = Interpreter::with_options(
            Arc::new(machine),
            InterpreterOptions::default().clock(clock.clone()),
        );
        let delivered = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&delivered);
        service.on_transition(move |_, event| {
            if event.name == "PING" {
                *sink.lock().unwrap() = true;
            }
        });
        service.start().expect("starts");
        service.send("ABORT").expect("cancels before the due time");
        clock.increment(delay + slack);
        prop_assert!(!*delivered.lock().unwrap());
        assert!(service.state().matches("waiting"));
    }
}
