//! A sine generator feeding an in-memory sink through a path.
//!
//! Run with: `cargo run --example 01_signal_to_loopback`

use millrace::clock::Timestamp;
use millrace::nodes::{LoopbackNode, SignalNode, Waveform};
use millrace::prelude::*;
use std::time::Duration;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("millrace=info")
        .init();

    println!("Signal to loopback");
    println!("==================\n");

    let source = Node::new(
        "sine",
        Box::new(
            SignalNode::new(Waveform::Sine)
                .with_rate(50.0)
                .with_frequency(5.0),
        ),
    )
    .into_shared();

    let sink_kind = LoopbackNode::new(64);
    let sink_handle = sink_kind.handle();
    let sink = Node::new("sink", Box::new(sink_kind)).into_shared();

    source.lock().unwrap().start()?;
    sink.lock().unwrap().start()?;

    let mut path = Path::builder("demo").source(source.clone()).destination(sink.clone()).build()?;
    path.check()?;
    path.start()?;

    for _ in 0..10 {
        let Some(smp) = sink_handle.extract(Duration::from_secs(2))? else {
            break;
        };
        let age = Timestamp::now().seconds_since(smp.ts().origin);
        println!(
            "seq {:>3}  value {:+.3}  age {:.1} ms",
            smp.sequence(),
            smp.values()[0].as_f32(),
            age * 1e3
        );
    }

    path.stop()?;
    source.lock().unwrap().stop()?;
    sink.lock().unwrap().stop()?;
    println!("\ndone");
    Ok(())
}
