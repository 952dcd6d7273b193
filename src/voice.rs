//! Voice bridge
//!
//! Wraps platform speech recognition and synthesis behind two small traits.
//! A platform without a capability reports [`VoiceSupport::Unsupported`]
//! and every call becomes a no-op.

use crate::Result;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const VOICE_LANG: &str = "pt-BR";

/// Characters dropped before text is spoken
const MARKDOWN_CHARS: &[char] = &['#', '*', '_', '`', '~', '[', ']', '(', ')', '>', '!', '-'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceSupport {
    Supported,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOptions {
    pub lang: String,
    pub continuous: bool,
    pub interim_results: bool,
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            lang: VOICE_LANG.to_string(),
            continuous: false,
            interim_results: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    pub transcript: String,
    pub is_final: bool,
}

/// Events a recognizer reports back to the bridge
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    Results(Vec<RecognitionResult>),
    Error(String),
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub rate: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisEvent {
    Start,
    End,
    Error(String),
}

pub trait SpeechRecognizer: Send + Sync {
    fn support(&self) -> VoiceSupport;
    fn start(&self, options: &RecognitionOptions) -> Result<()>;
    fn stop(&self);
}

pub trait SpeechSynthesizer: Send + Sync {
    fn support(&self) -> VoiceSupport;
    fn speak(&self, utterance: &Utterance) -> Result<()>;
    fn cancel(&self);
}

/// Stand-in for targets without speech capabilities
#[derive(Debug, Default, Clone, Copy)]
pub struct NoVoice;

impl SpeechRecognizer for NoVoice {
    fn support(&self) -> VoiceSupport {
        VoiceSupport::Unsupported
    }

    fn start(&self, _options: &RecognitionOptions) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

impl SpeechSynthesizer for NoVoice {
    fn support(&self) -> VoiceSupport {
        VoiceSupport::Unsupported
    }

    fn speak(&self, _utterance: &Utterance) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}

/// Strip markdown punctuation and turn line breaks into sentence breaks.
pub fn sanitize_for_speech(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !MARKDOWN_CHARS.contains(c)).collect();

    let mut out = String::with_capacity(stripped.len());
    let mut in_newlines = false;
    for c in stripped.chars() {
        if c == '\n' {
            if !in_newlines {
                out.push_str(". ");
            }
            in_newlines = true;
        } else {
            out.push(c);
            in_newlines = false;
        }
    }

    out.trim().to_string()
}

type FinalCallback = Box<dyn FnOnce(String) + Send>;

#[derive(Default)]
struct VoiceState {
    is_listening: bool,
    is_speaking: bool,
    transcript: String,
    on_final: Option<FinalCallback>,
}

pub struct VoiceBridge {
    recognizer: Arc<dyn SpeechRecognizer>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    state: Mutex<VoiceState>,
}

impl VoiceBridge {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            recognizer,
            synthesizer,
            state: Mutex::new(VoiceState::default()),
        }
    }

    /// Bridge with neither capability
    pub fn unsupported() -> Self {
        Self::new(Arc::new(NoVoice), Arc::new(NoVoice))
    }

    fn lock(&self) -> MutexGuard<'_, VoiceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn supports_recognition(&self) -> VoiceSupport {
        self.recognizer.support()
    }

    pub fn supports_synthesis(&self) -> VoiceSupport {
        self.synthesizer.support()
    }

    pub fn is_listening(&self) -> bool {
        self.lock().is_listening
    }

    pub fn is_speaking(&self) -> bool {
        self.lock().is_speaking
    }

    /// Interim transcript of the utterance in progress
    pub fn transcript(&self) -> String {
        self.lock().transcript.clone()
    }

    /// Start listening; `on_final` receives the final transcript.
    pub fn start_listening<F>(&self, on_final: F) -> VoiceSupport
    where
        F: FnOnce(String) + Send + 'static,
    {
        if self.recognizer.support() == VoiceSupport::Unsupported {
            return VoiceSupport::Unsupported;
        }

        {
            let mut state = self.lock();
            state.on_final = Some(Box::new(on_final));
            state.is_listening = true;
        }

        if let Err(e) = self.recognizer.start(&RecognitionOptions::default()) {
            warn!(error = %e, "Speech recognition failed to start");
            let mut state = self.lock();
            state.is_listening = false;
            state.on_final = None;
        }
        VoiceSupport::Supported
    }

    pub fn stop_listening(&self) {
        self.recognizer.stop();
        let mut state = self.lock();
        state.is_listening = false;
        state.transcript.clear();
        state.on_final = None;
    }

    /// Feed an event from the platform recognizer.
    pub fn handle_recognition_event(&self, event: RecognitionEvent) {
        let finished = {
            let mut state = self.lock();
            match event {
                RecognitionEvent::Results(results) => {
                    let text: String = results.iter().map(|r| r.transcript.as_str()).collect();
                    let is_final = results.last().is_some_and(|r| r.is_final);

                    if is_final {
                        state.transcript.clear();
                        state.is_listening = false;
                        state.on_final.take().map(|callback| (callback, text))
                    } else {
                        state.transcript = text;
                        None
                    }
                }
                RecognitionEvent::Error(reason) => {
                    debug!(%reason, "Speech recognition error");
                    state.is_listening = false;
                    state.transcript.clear();
                    None
                }
                RecognitionEvent::End => {
                    state.is_listening = false;
                    None
                }
            }
        };

        // Outside the lock: the callback may call back into the bridge
        if let Some((callback, text)) = finished {
            callback(text);
        }
    }

    /// Speak `text` after stripping markdown. Returns whether anything was queued.
    pub fn speak(&self, text: &str) -> bool {
        if self.synthesizer.support() == VoiceSupport::Unsupported {
            return false;
        }

        let clean = sanitize_for_speech(text);
        if clean.is_empty() {
            return false;
        }

        self.synthesizer.cancel();
        let utterance = Utterance {
            text: clean,
            lang: VOICE_LANG.to_string(),
            rate: 1.0,
        };

        match self.synthesizer.speak(&utterance) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed");
                self.lock().is_speaking = false;
                false
            }
        }
    }

    pub fn handle_synthesis_event(&self, event: SynthesisEvent) {
        let mut state = self.lock();
        match event {
            SynthesisEvent::Start => state.is_speaking = true,
            SynthesisEvent::End => state.is_speaking = false,
            SynthesisEvent::Error(reason) => {
                debug!(%reason, "Speech synthesis error");
                state.is_speaking = false;
            }
        }
    }

    pub fn stop_speaking(&self) {
        self.synthesizer.cancel();
        self.lock().is_speaking = false;
    }
}

impl Drop for VoiceBridge {
    fn drop(&mut self) {
        self.recognizer.stop();
        self.synthesizer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;

    #[derive(Default)]
    struct RecordingSpeech {
        calls: Mutex<Vec<String>>,
        spoken: Mutex<Vec<Utterance>>,
        fail_start: bool,
    }

    impl RecordingSpeech {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SpeechRecognizer for RecordingSpeech {
        fn support(&self) -> VoiceSupport {
            VoiceSupport::Supported
        }

        fn start(&self, options: &RecognitionOptions) -> Result<()> {
            self.calls.lock().unwrap().push(format!("start:{}", options.lang));
            if self.fail_start {
                return Err(TrackerError::Remote("microphone denied".into()));
            }
            Ok(())
        }

        fn stop(&self) {
            self.calls.lock().unwrap().push("stop".into());
        }
    }

    impl SpeechSynthesizer for RecordingSpeech {
        fn support(&self) -> VoiceSupport {
            VoiceSupport::Supported
        }

        fn speak(&self, utterance: &Utterance) -> Result<()> {
            self.spoken.lock().unwrap().push(utterance.clone());
            Ok(())
        }

        fn cancel(&self) {
            self.calls.lock().unwrap().push("cancel".into());
        }
    }

    fn bridge() -> (Arc<RecordingSpeech>, VoiceBridge) {
        let speech = Arc::new(RecordingSpeech::default());
        let bridge = VoiceBridge::new(speech.clone(), speech.clone());
        (speech, bridge)
    }

    fn result(text: &str, is_final: bool) -> RecognitionResult {
        RecognitionResult {
            transcript: text.to_string(),
            is_final,
        }
    }

    #[test]
    fn test_sanitize_for_speech() {
        assert_eq!(
            sanitize_for_speech("## Dicas\n\n- **Poupe** 10%\n- Use [CDB](link)!"),
            "Dicas.  Poupe 10%.  Use CDBlink"
        );
        assert_eq!(sanitize_for_speech("***\n\n"), ".");
        assert_eq!(sanitize_for_speech("  # \n"), ".");
        assert_eq!(sanitize_for_speech("**"), "");
    }

    #[test]
    fn test_unsupported_is_a_sentinel() {
        let bridge = VoiceBridge::unsupported();

        assert_eq!(bridge.supports_recognition(), VoiceSupport::Unsupported);
        assert_eq!(bridge.start_listening(|_| panic!("never called")), VoiceSupport::Unsupported);
        assert!(!bridge.is_listening());
        assert!(!bridge.speak("Olá"));
    }

    #[test]
    fn test_final_result_fires_callback_and_stops() {
        let (speech, bridge) = bridge();
        let heard = Arc::new(Mutex::new(None));

        let sink = heard.clone();
        assert_eq!(
            bridge.start_listening(move |text| *sink.lock().unwrap() = Some(text)),
            VoiceSupport::Supported
        );
        assert!(bridge.is_listening());
        assert_eq!(speech.calls(), vec!["start:pt-BR"]);

        bridge.handle_recognition_event(RecognitionEvent::Results(vec![result("quanto ", false)]));
        assert_eq!(bridge.transcript(), "quanto ");
        assert!(heard.lock().unwrap().is_none());

        bridge.handle_recognition_event(RecognitionEvent::Results(vec![
            result("quanto ", true),
            result("rende a poupança", true),
        ]));
        assert_eq!(heard.lock().unwrap().as_deref(), Some("quanto rende a poupança"));
        assert!(!bridge.is_listening());
        assert!(bridge.transcript().is_empty());
    }

    #[test]
    fn test_recognition_error_resets_state() {
        let (_, bridge) = bridge();
        bridge.start_listening(|_| {});
        bridge.handle_recognition_event(RecognitionEvent::Results(vec![result("oi", false)]));

        bridge.handle_recognition_event(RecognitionEvent::Error("no-speech".into()));
        assert!(!bridge.is_listening());
        assert!(bridge.transcript().is_empty());
    }

    #[test]
    fn test_failed_start_is_not_listening() {
        let speech = Arc::new(RecordingSpeech {
            fail_start: true,
            ..Default::default()
        });
        let bridge = VoiceBridge::new(speech.clone(), speech);

        assert_eq!(bridge.start_listening(|_| {}), VoiceSupport::Supported);
        assert!(!bridge.is_listening());
    }

    #[test]
    fn test_speak_cancels_then_speaks_clean_text() {
        let (speech, bridge) = bridge();

        assert!(bridge.speak("**Guarde** R$ 34\npor dia"));
        assert_eq!(speech.calls(), vec!["cancel"]);

        let spoken = speech.spoken.lock().unwrap().clone();
        assert_eq!(spoken[0].text, "Guarde R$ 34. por dia");
        assert_eq!(spoken[0].lang, "pt-BR");

        bridge.handle_synthesis_event(SynthesisEvent::Start);
        assert!(bridge.is_speaking());
        bridge.stop_speaking();
        assert!(!bridge.is_speaking());
    }

    #[test]
    fn test_empty_text_is_not_spoken() {
        let (speech, bridge) = bridge();
        assert!(!bridge.speak("*** ---"));
        assert!(speech.spoken.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_releases_devices() {
        let (speech, bridge) = bridge();
        drop(bridge);
        assert_eq!(speech.calls(), vec!["stop", "cancel"]);
    }
}
