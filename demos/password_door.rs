//! A parent machine that invokes a child to check a password.
//!
//! Demonstrates `invoke`, context seeding via `data`, `send_parent`, and
//! guarded transitions over event payloads.
//!
//! Run with: cargo run --example password_door

use lattice::actions::send_parent_with;
use lattice::{
    Event, Interpreter, InvokeBuilder, MachineDef, MachineOptions, StateDef, TransitionDef,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct Ctx {
    password: String,
}

fn main() {
    let checker = Arc::new(
        MachineDef::new("checker")
            .context(Ctx {
                password: String::new(),
            })
            .initial("checking")
            .state(
                "checking",
                StateDef::new().entry(send_parent_with(|ctx: &Ctx, _: &Event| {
                    Event::with_payload("RESULT", json!({ "password": ctx.password }))
                })),
            )
            .build(MachineOptions::default())
            .expect("child definition is valid"),
    );

    let door = MachineDef::new("door")
        .context(Ctx {
            password: "open-sesame".to_string(),
        })
        .initial("locked")
        .state(
            "locked",
            StateDef::new()
                .invoke(
                    InvokeBuilder::new(checker)
                        .id("checker")
                        .data(|ctx: &Ctx, _| ctx.clone()),
                )
                .on(
                    "RESULT",
                    TransitionDef::to("open")
                        .cond(|_: &Ctx, event: &Event| event.payload["password"] == "open-sesame"),
                ),
        )
        .state("open", StateDef::final_state())
        .build(MachineOptions::default())
        .expect("door definition is valid");

    let service = Interpreter::new(Arc::new(door));
    service.on_done(|state, _| {
        println!("door is {}", state.to_strings().join("."));
    });
    service.start().expect("starts");
}
