//  _______  _       _________ _______  _______
// (  ____ \| \    /|\__   __/(       )(  ____ \
// | (    \/| (    ) |   ) (   | () () || (    \/
// | |      | (____) |   | |   | || || || (__
// | |      |  ____  |   | |   | |(_)| ||  __)
// | |      | (    ) |   | |   | |   | || (
// | (____/\| )    ( |___) (___| )   ( || (____/\
// (_______/|/     \|\_______/|/     \|(_______/

pub mod error;
pub mod config;
pub mod waveform;
pub mod oscillator;
pub mod modulation;
pub mod envelope;
pub mod effects;
pub mod note;
pub mod cancel;
pub mod controls;
pub mod pool;
pub mod patch;
pub mod voice;
pub mod mixer;
pub mod wav;
pub mod analysis;
pub mod prerender;
pub mod output;

pub use error::{Result, SynthError};
pub use config::{AudioConfig, PreRenderConfig, CHANNELS};
pub use waveform::WaveformType;
pub use modulation::{Lfo, LfoShape, LfoTarget, ModParam, ModSource, PitchDriftConfig, SubOscillatorConfig, TransientConfig, VibratoConfig};
pub use envelope::Adsr;
pub use effects::{DelayParams, DistortionParams, Effect, EffectSpec, FilterParams, FilterType, ReverbParams};
pub use note::{Instrument, NoteExpression, Song, midi_to_frequency};
pub use cancel::CancellationToken;
pub use controls::MasterControls;
pub use patch::{Layer, Patch, SynthPatch};
pub use voice::SynthSignalSource;
pub use mixer::{ScheduledSignalSourceMixer, SongScheduler};
pub use analysis::RenderAnalysis;
pub use prerender::{AudioPreRenderer, CachedWave, NoteKey};
pub use output::AudioOutput;
