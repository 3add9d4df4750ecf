use dfflibmap::netlist::Design;
use dfflibmap::pass::{self, CheckLegal, Options};
use std::path::{Path, PathBuf};

fn run(
    options: &Options,
    input_fn: &str,
    output_fn: Option<&str>,
    select: &[String],
) -> Result<(), pass::Error> {
    options.mode()?;

    let mut design = Design::read_file(Path::new(input_fn))?;
    design.select(select)?;

    let mut check = CheckLegal::default();
    let outcome = pass::run(&mut design, options, &mut check)?;
    for (module, stats) in outcome.stats.iter() {
        let total: usize = stats.values().sum();
        eprintln!("{total:>7} cells mapped in {module}");
    }

    if let Some(output_fn) = output_fn {
        eprintln!("Writing result..");
        design.write_file(Path::new(output_fn))?;
    }
    Ok(())
}

fn main() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();

    let mut input_fn = String::new();
    let mut output_fn: Option<String> = None;
    let mut liberty_fns: Vec<String> = Vec::new();
    let mut dont_use: Vec<String> = Vec::new();
    let mut select: Vec<String> = Vec::new();
    let mut prepare = false;
    let mut map_only = false;
    let mut info = false;

    {
        let mut parser = argparse::ArgumentParser::new();
        parser.set_description("Map abstract flip-flops onto Liberty library cells");
        parser
            .refer(&mut input_fn)
            .add_argument("INPUT", argparse::Store, "Input netlist (Yosys JSON)")
            .required();
        parser.refer(&mut output_fn).add_argument(
            "OUTPUT",
            argparse::StoreOption,
            "Output netlist (Yosys JSON)",
        );
        parser.refer(&mut liberty_fns).add_option(
            &["--liberty"],
            argparse::Collect,
            "Liberty file to read cells from (repeatable)",
        );
        parser.refer(&mut dont_use).add_option(
            &["--dont-use"],
            argparse::Collect,
            "Exclude cells matching the glob pattern (repeatable)",
        );
        parser.refer(&mut select).add_option(
            &["--select"],
            argparse::Collect,
            "Restrict mapping to MODULE or MODULE/CELL glob patterns (repeatable)",
        );
        parser.refer(&mut prepare).add_option(
            &["--prepare"],
            argparse::StoreTrue,
            "Only legalize flip-flops to the shapes the library supports",
        );
        parser.refer(&mut map_only).add_option(
            &["--map-only"],
            argparse::StoreTrue,
            "Only map flip-flops, skip the legalize step",
        );
        parser.refer(&mut info).add_option(
            &["--info"],
            argparse::StoreTrue,
            "Print the cell mapping and legalize command, change nothing",
        );
        parser.parse_args_or_exit();
    }

    let options = Options {
        liberty_files: liberty_fns.into_iter().map(PathBuf::from).collect(),
        dont_use,
        prepare,
        map_only,
        info,
    };

    if let Err(error) = run(&options, &input_fn, output_fn.as_deref(), &select) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}
