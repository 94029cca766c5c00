use std::collections::VecDeque;

struct ScheduledBuffer {
    start: u64,
    samples: Vec<f32>,
}

impl ScheduledBuffer {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Sample-accurate output timeline for a persistent output stream
///
/// Buffers are placed at absolute frame positions on the device clock; the
/// output callback renders whatever covers the current position and silence
/// elsewhere. Position only advances as the device consumes frames.
#[derive(Default)]
pub struct OutputTimeline {
    position: u64,
    queue: VecDeque<ScheduledBuffer>,
}

impl OutputTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Buffers not yet fully rendered
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Place `samples` to start at frame `start`
    pub fn schedule(&mut self, start: u64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        let buffer = ScheduledBuffer { start, samples };
        match self.queue.back() {
            Some(last) if last.start > start => {
                let index = self.queue.partition_point(|b| b.start <= start);
                self.queue.insert(index, buffer);
            }
            _ => self.queue.push_back(buffer),
        }
    }

    /// Drop everything not yet rendered
    pub fn flush(&mut self) {
        self.queue.clear();
    }

    /// Render the next frame's sample and advance the clock
    pub fn next_sample(&mut self) -> f32 {
        let t = self.position;
        self.position += 1;

        while self.queue.front().is_some_and(|b| b.end() <= t) {
            self.queue.pop_front();
        }

        match self.queue.front() {
            Some(buffer) if buffer.start <= t => buffer.samples[(t - buffer.start) as usize],
            _ => 0.0,
        }
    }

    /// Fill an interleaved output buffer, duplicating mono across channels
    pub fn render(&mut self, output: &mut [f32], channels: usize) {
        for frame in output.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }
}
