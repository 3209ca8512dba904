// snd_wav.rs — sample decoding seam and the RIFF/WAV decoder

use arclight_common::console::con_print;

/// Decoded mono PCM, normalized to 16-bit.
#[derive(Clone, Default)]
pub struct DecodedSample {
    pub samples: Vec<i16>,
    pub rate: u32,
    /// Sample index the steady loop restarts from, -1 if the asset has
    /// no loop marker.
    pub loop_start: i32,
}

/// Asset decoding boundary. Mono is a hard input constraint; stereo and
/// float inputs are decode failures, not separately distinguished.
pub trait SampleDecoder: Send + Sync {
    fn exists(&self, name: &str) -> bool;
    fn decode(&self, name: &str) -> Option<DecodedSample>;
}

// ============================================================
// WAV parsing
// ============================================================

#[derive(Clone, Default)]
struct WavInfo {
    rate: i32,
    width: i32,
    channels: i32,
    loopstart: i32,
    samples: i32,
    dataofs: i32,
}

struct WavChunks {
    data: Vec<u8>,
    pos: usize,
    iff_end: usize,
    last_chunk: usize,
    iff_data: usize,
    chunk_len: i32,
}

impl WavChunks {
    fn new(data: Vec<u8>) -> Self {
        let len = data.len();
        Self {
            data,
            pos: 0,
            iff_end: len,
            last_chunk: 0,
            iff_data: 0,
            chunk_len: 0,
        }
    }

    fn read_i16(&mut self) -> i16 {
        if self.pos + 2 > self.data.len() {
            return 0;
        }
        let val = i16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        val
    }

    fn read_i32(&mut self) -> i32 {
        if self.pos + 4 > self.data.len() {
            return 0;
        }
        let val = i32::from_le_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        val
    }

    fn find_next_chunk(&mut self, name: &[u8; 4]) -> bool {
        loop {
            self.pos = self.last_chunk;

            if self.pos >= self.iff_end {
                return false;
            }

            self.pos += 4;
            self.chunk_len = self.read_i32();
            if self.chunk_len < 0 {
                return false;
            }
            self.pos -= 8;
            // Chunks are word-aligned.
            self.last_chunk = self.pos + 8 + ((self.chunk_len as usize + 1) & !1);

            if self.pos + 4 <= self.data.len() && &self.data[self.pos..self.pos + 4] == name {
                return true;
            }
        }
    }

    fn find_chunk(&mut self, name: &[u8; 4]) -> bool {
        self.last_chunk = self.iff_data;
        self.find_next_chunk(name)
    }

    fn parse(&mut self, name: &str) -> Option<WavInfo> {
        let mut info = WavInfo { loopstart: -1, ..WavInfo::default() };

        if self.data.is_empty() {
            return None;
        }

        self.iff_data = 0;
        self.iff_end = self.data.len();

        if !self.find_chunk(b"RIFF") {
            con_print(&format!("{}: missing RIFF/WAVE chunks\n", name));
            return None;
        }
        if self.pos + 12 > self.data.len() || &self.data[self.pos + 8..self.pos + 12] != b"WAVE" {
            con_print(&format!("{}: missing RIFF/WAVE chunks\n", name));
            return None;
        }

        self.iff_data = self.pos + 12;

        if !self.find_chunk(b"fmt ") {
            con_print(&format!("{}: missing fmt chunk\n", name));
            return None;
        }

        self.pos += 8;
        let format = self.read_i16();
        if format != 1 {
            con_print(&format!("{}: Microsoft PCM format only\n", name));
            return None;
        }

        info.channels = self.read_i16() as i32;
        info.rate = self.read_i32();
        self.pos += 4 + 2; // skip avgBytesPerSec + blockAlign
        info.width = self.read_i16() as i32 / 8;

        // Cue chunk carries the loop start marker.
        if self.find_chunk(b"cue ") {
            self.pos += 32;
            info.loopstart = self.read_i32();

            if self.find_next_chunk(b"LIST")
                && self.pos + 32 <= self.data.len()
                && &self.data[self.pos + 28..self.pos + 32] == b"mark"
            {
                self.pos += 24;
                let looped = self.read_i32();
                info.samples = info.loopstart + looped;
            }
        }

        if !self.find_chunk(b"data") {
            con_print(&format!("{}: missing data chunk\n", name));
            return None;
        }

        self.pos += 4;
        if info.width <= 0 {
            return None;
        }
        let samples = self.read_i32() / info.width;

        if info.samples != 0 {
            if samples < info.samples {
                con_print(&format!("{}: bad loop length\n", name));
                return None;
            }
        } else {
            info.samples = samples;
        }

        info.dataofs = self.pos as i32;
        Some(info)
    }
}

/// Decode a WAV byte image into mono 16-bit PCM. 8-bit input is widened;
/// stereo and >16-bit input is refused.
pub fn decode_wav(name: &str, data: Vec<u8>) -> Option<DecodedSample> {
    let mut chunks = WavChunks::new(data);
    let info = chunks.parse(name)?;

    if info.channels != 1 {
        con_print(&format!("{} is a stereo sample\n", name));
        return None;
    }
    if info.width != 1 && info.width != 2 {
        con_print(&format!("{}: unsupported sample width\n", name));
        return None;
    }
    if info.rate <= 0 || info.samples <= 0 {
        return None;
    }

    let dataofs = info.dataofs as usize;
    let data_len = (info.samples * info.width) as usize;
    if dataofs >= chunks.data.len() {
        return None;
    }
    let end = (dataofs + data_len).min(chunks.data.len());
    let raw = &chunks.data[dataofs..end];

    let samples: Vec<i16> = if info.width == 1 {
        // 8-bit PCM is unsigned, centered at 128.
        raw.iter().map(|&s| (s as i16 - 128) * 256).collect()
    } else {
        raw.chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect()
    };

    Some(DecodedSample {
        samples,
        rate: info.rate as u32,
        loop_start: info.loopstart,
    })
}

// ============================================================
// File-backed decoder
// ============================================================

/// Resolve an asset name to a load path: names starting with `#` are
/// absolute within the asset tree, everything else lives under `sound/`.
pub fn sound_asset_path(name: &str) -> String {
    if let Some(stripped) = name.strip_prefix('#') {
        stripped.to_string()
    } else {
        format!("sound/{}", name)
    }
}

type LoadFileFn = dyn Fn(&str) -> Option<Vec<u8>> + Send + Sync;

/// WAV decoder over an arbitrary file source (pak archive, loose files,
/// test fixtures).
pub struct WavDecoder {
    load_file: Box<LoadFileFn>,
}

impl WavDecoder {
    pub fn new<F>(load_file: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        Self { load_file: Box::new(load_file) }
    }
}

impl SampleDecoder for WavDecoder {
    fn exists(&self, name: &str) -> bool {
        (self.load_file)(&sound_asset_path(name)).is_some()
    }

    fn decode(&self, name: &str) -> Option<DecodedSample> {
        let path = sound_asset_path(name);
        let data = match (self.load_file)(&path) {
            Some(d) => d,
            None => {
                con_print(&format!("Couldn't load {}\n", path));
                return None;
            }
        };
        decode_wav(name, data)
    }
}

// ============================================================
// Tests
// ============================================================
