
use std::sync::Arc;

use crate::testing::{FragmentRecorder, Script, ScriptedEngine, Stats};
use crate::{CancelMode, LoadParams, Session, TokenSink};

const MODEL: &str = "models/scripted.gguf";

fn loaded(script: Script) -> (Session<ScriptedEngine>, Arc<Stats>) {
    loaded_with(script, CancelMode::StopRequest, &LoadParams::default())
}

fn loaded_with(
    script: Script,
    mode: CancelMode,
    params: &LoadParams,
) -> (Session<ScriptedEngine>, Arc<Stats>) {
    let engine = ScriptedEngine::new(script);
    let stats = engine.stats();
    let session = Session::new(engine, mode);
    session.load(MODEL, params).unwrap();
    (session, stats)
}

fn record(session: &Session<ScriptedEngine>) -> Arc<FragmentRecorder> {
    let recorder = Arc::new(FragmentRecorder::default());
    let sink: Arc<dyn TokenSink> = recorder.clone();
    session.set_token_sink(Some(sink));
    recorder
}
