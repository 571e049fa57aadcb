use std::error::Error;
use std::fs;
use std::path::PathBuf;

use cancer_serve::preprocess::normalize;
use cancer_serve::{classify, model, Label, Timer, Upload};
use log::info;
use serde::Serialize;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "cancer-classify",
    about = "Classify a local image with the cancer prediction model"
)]
struct CmdArgs {
    #[structopt(parse(from_os_str), help = "Export directory of TensorFlow SavedModel")]
    model_dir: PathBuf,

    #[structopt(parse(from_os_str), help = "Image file to classify")]
    image_path: PathBuf,

    #[structopt(
        long,
        default_value = "image/jpeg",
        help = "Content type the file is checked as, like an upload's"
    )]
    content_type: String,
}

#[derive(Serialize)]
struct Output {
    result: Label,
    suggestion: &'static str,
    score: f32,
    elapsed_msec: i64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let model = model::load(&args.model_dir)?;
    info!("Model loaded from {}", args.model_dir.display());

    let data = fs::read(&args.image_path)?;
    let upload = Upload::new(Some(&args.content_type), data);

    let mut t = Timer::new_start("Classifying image");
    let pixels = normalize(Some(upload))?;
    let classification = classify(model.as_ref(), &pixels)?;
    let elapsed = t.stop();

    let output = Output {
        result: classification.result,
        suggestion: classification.result.suggestion(),
        score: classification.score,
        elapsed_msec: elapsed.map(|d| d.num_milliseconds()).unwrap_or(0),
    };
    println!("{}", serde_json::to_string(&output)?);

    Ok(())
}
