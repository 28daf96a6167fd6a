use micro_foam::{Ensemble, MacroInput, MicroConfig, SystemRunner};
use std::env;
use tracing_subscriber::EnvFilter;

/// Dummy macro model: every micro simulation receives the average velocity of the previous
/// window, scaled by the position of the micro simulation along the macro domain.
fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let args: Vec<String> = env::args().collect();
    let config = match args.get(1) {
        Some(path) => MicroConfig::from_file(path).unwrap(),
        None => MicroConfig::default(),
    };
    let n_micro: usize = args.get(2).map(|n| n.parse().unwrap()).unwrap_or(2);
    let n_steps: usize = args.get(3).map(|n| n.parse().unwrap()).unwrap_or(5);
    let dt = 0.1;

    let mut ensemble = Ensemble::new(0..n_micro, &config, SystemRunner).unwrap();
    let mut inlet = vec![1.; n_micro];

    for step in 0..n_steps {
        let inputs: Vec<_> = inlet
            .iter()
            .enumerate()
            .map(|(i, u)| MacroInput::new(u * (1. + i as f64 / n_micro as f64)))
            .collect();
        let checkpoints = ensemble.get_states();

        let mut outputs = ensemble.solve(&inputs, dt).unwrap();
        if outputs.iter().any(|o| o.is_err()) {
            // retry the whole window once from the previous checkpoints
            ensemble.set_states(&checkpoints).unwrap();
            outputs = ensemble.solve(&inputs, dt).unwrap();
            if let Some(Err(e)) = outputs.iter().find(|o| o.is_err()) {
                panic!("macro step {step} failed: {e}");
            }
        }
        for (u, output) in inlet.iter_mut().zip(outputs.into_iter().flatten()) {
            println!("{}", serde_json::to_string(&output).unwrap());
            *u = output.scalar;
        }
    }

    ensemble.remove_cases().unwrap();
}
