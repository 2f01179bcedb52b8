//! Two generators gated into rounds: the path emits one sample per source
//! only when both have delivered.
//!
//! Run with: `cargo run --example 02_multi_source_all`

use millrace::nodes::{LoopbackNode, SignalNode, Waveform};
use millrace::prelude::*;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("millrace=info")
        .init();

    println!("Multi-source rounds");
    println!("===================\n");

    // The ramp runs at half the counter's rate, so it gates every round.
    let counter = Node::new(
        "counter",
        Box::new(SignalNode::new(Waveform::Counter).with_rate(40.0)),
    )
    .into_shared();
    let ramp = Node::new(
        "ramp",
        Box::new(SignalNode::new(Waveform::Ramp).with_rate(20.0)),
    )
    .into_shared();

    let sink_kind = LoopbackNode::new(64);
    let sink_handle = sink_kind.handle();
    let sink = Node::new("sink", Box::new(sink_kind)).into_shared();

    for node in [&counter, &ramp, &sink] {
        node.lock().unwrap().start()?;
    }

    // The built-in reorder filter compares sequences across the merged
    // stream, which is meaningless for independent counters; leave the
    // chain empty.
    let mut path = Path::builder("rounds")
        .source(counter.clone())
        .source(ramp.clone())
        .destination(sink.clone())
        .mode(Mode::All)
        .builtin(false)
        .build()?;
    path.check()?;
    path.start()?;

    for round in 0..6 {
        let Some(a) = sink_handle.extract(Duration::from_secs(2))? else {
            break;
        };
        let Some(b) = sink_handle.extract(Duration::from_secs(2))? else {
            break;
        };
        println!(
            "round {round}: counter seq {:>3} value {:>5.1} | ramp seq {:>3} value {:.2}",
            a.sequence(),
            a.values()[0].as_f32(),
            b.sequence(),
            b.values()[0].as_f32()
        );
    }

    path.stop()?;
    for node in [&counter, &ramp, &sink] {
        node.lock().unwrap().stop()?;
    }
    println!("\ndone");
    Ok(())
}
