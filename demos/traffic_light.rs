//! Traffic light statechart driven over a simulated clock.
//!
//! Demonstrates delayed transitions (`after`), the simulated clock, and
//! observer notification.
//!
//! Run with: cargo run --example traffic_light

use lattice::{
    Interpreter, InterpreterOptions, MachineDef, MachineOptions, SimulatedClock, StateDef,
};
use std::sync::Arc;

fn main() {
    let machine = MachineDef::new("light")
        .context(())
        .initial("green")
        .state("green", StateDef::new().after(1000, "yellow"))
        .state("yellow", StateDef::new().after(500, "red"))
        .state("red", StateDef::new().after(1000, "green"))
        .build(MachineOptions::default())
        .expect("definition is valid");

    let clock = Arc::new(SimulatedClock::new());
    let service = Interpreter::with_options(
        Arc::new(machine),
        InterpreterOptions::default().clock(clock.clone()),
    );
    service.on_transition(|state, event| {
        println!("[{:>11}] -> {}", event.name, state.to_strings().join("."));
    });
    service.start().expect("starts");

    for _ in 0..6 {
        clock.increment(500);
    }

    println!("final state: {}", service.state().to_strings().join("."));
}
