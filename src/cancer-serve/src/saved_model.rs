use std::collections::HashMap;
use std::path::Path;

use log::debug;
use tensorflow::{
    Graph, SavedModelBundle, SessionOptions, SessionRunArgs, Status, Tensor, TensorInfo,
};

use crate::model::{InferenceError, InputTensor, Model, ModelError};
use crate::timer::Timer;

const SERVE_TAG: &str = "serve";
const SIGNATURE_KEY: &str = "serving_default";

/// Operation name and output index of one signature tensor.
#[derive(Debug, Clone)]
struct Endpoint {
    op: String,
    index: i32,
}

/// A TensorFlow SavedModel run through its `serving_default` signature.
pub struct SavedModel {
    /// TensorFlow model graph
    graph: Graph,

    /// Session and meta graph
    bundle: SavedModelBundle,

    input: Endpoint,
    output: Endpoint,
}

impl SavedModel {
    pub fn load(export_dir: &Path) -> Result<Self, ModelError> {
        let mut t = Timer::new_start("Loading session");

        let mut graph = Graph::new();
        let bundle =
            SavedModelBundle::load(&SessionOptions::new(), &[SERVE_TAG], &mut graph, export_dir)
                .map_err(load_error)?;

        let signature = bundle
            .meta_graph_def()
            .get_signature(SIGNATURE_KEY)
            .map_err(load_error)?;
        let input = first_endpoint(signature.inputs()).ok_or(ModelError::Signature("input"))?;
        let output = first_endpoint(signature.outputs()).ok_or(ModelError::Signature("output"))?;

        graph
            .operation_by_name_required(&input.op)
            .map_err(load_error)?;
        graph
            .operation_by_name_required(&output.op)
            .map_err(load_error)?;

        t.stop();
        debug!("Model input {:?}, output {:?}", input, output);

        Ok(SavedModel {
            graph,
            bundle,
            input,
            output,
        })
    }
}

impl Model for SavedModel {
    fn predict(&self, input: &InputTensor) -> Result<f32, InferenceError> {
        let tensor = Tensor::new(&InputTensor::SHAPE)
            .with_values(input.values())
            .map_err(run_error)?;

        let input_op = self
            .graph
            .operation_by_name_required(&self.input.op)
            .map_err(run_error)?;
        let output_op = self
            .graph
            .operation_by_name_required(&self.output.op)
            .map_err(run_error)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_op, self.input.index, &tensor);
        let fetch = args.request_fetch(&output_op, self.output.index);

        self.bundle.session.run(&mut args).map_err(run_error)?;
        let scores: Tensor<f32> = args.fetch(fetch).map_err(run_error)?;

        scores.first().copied().ok_or(InferenceError::EmptyOutput)
    }
}

// Signature maps are unordered; pick the lowest key so loads are repeatable.
fn first_endpoint(tensors: &HashMap<String, TensorInfo>) -> Option<Endpoint> {
    tensors
        .iter()
        .min_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, info)| Endpoint {
            op: info.name().name.clone(),
            index: info.name().index,
        })
}

fn load_error(status: Status) -> ModelError {
    ModelError::Load(status.to_string())
}

fn run_error(status: Status) -> InferenceError {
    InferenceError::Runtime(status.to_string())
}
