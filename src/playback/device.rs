// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Cursor;
use std::time::Duration;

use bytes::Bytes;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};

use super::stream::{AudioOutput, StreamingBackend};

/// Playback through the system's default output device
pub struct DeviceOutput {
    // Declared first so it is dropped before the stream it plays into
    sink: Sink,
    _stream: OutputStream,
}

impl DeviceOutput {
    pub fn open_default() -> Result<Self, String> {
        let stream = OutputStreamBuilder::open_default_stream().map_err(|e| e.to_string())?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();
        Ok(Self {
            sink,
            _stream: stream,
        })
    }
}

impl AudioOutput for DeviceOutput {
    fn load(&mut self, audio: Bytes) -> Result<Option<Duration>, String> {
        let source = Decoder::new(Cursor::new(audio)).map_err(|e| e.to_string())?;
        let duration = source.total_duration();

        self.sink.clear();
        self.sink.append(source);
        self.sink.pause();
        Ok(duration)
    }

    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn seek(&mut self, position: Duration) -> Result<(), String> {
        self.sink.try_seek(position).map_err(|e| e.to_string())
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn position(&self) -> Duration {
        self.sink.get_pos()
    }

    fn is_paused(&self) -> bool {
        self.sink.is_paused()
    }

    fn finished(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}

/// Streaming backend bound to the default output device
pub type DeviceBackend<C> = StreamingBackend<C, fn() -> Result<DeviceOutput, String>>;

impl<C> StreamingBackend<C, fn() -> Result<DeviceOutput, String>> {
    pub fn default_device(client: C) -> Self {
        Self::new(client, DeviceOutput::open_default)
    }
}
