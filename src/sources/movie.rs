//! Clock-driven playback source.
//!
//! [`MoviePlayer`] does not own a thread. The application calls [`MoviePlayer::tick`]
//! from its display-refresh callback; each tick may copy one decoded frame from the
//! [`MediaPlayback`] collaborator and hand it to the processing queue. At most one frame
//! is in flight: while it is being processed further ticks drop frames instead of
//! queueing them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use crate::foundation::core::MediaTime;
use crate::foundation::error::{LumaError, LumaResult};
use crate::foundation::orientation::ImageOrientation;
use crate::graph::container::NodeId;
use crate::graph::node::{Node, NodeContext};
use crate::graph::queue::QueueHandle;
use crate::render::framebuffer::{FramebufferId, FramebufferTiming, UserInfo};
use crate::sources::raw::{RawPixelBuffer, push_raw_frame};

/// Tolerance used when a seek resumes playback: about three frames at 30 fps.
pub const DEFAULT_SEEK_TOLERANCE: MediaTime = MediaTime::from_micros(100_000);

/// The decoder and clock behind a [`MoviePlayer`].
pub trait MediaPlayback: Send {
    /// Whether the media is loaded and can report times and frames.
    fn is_ready(&self) -> bool;

    fn current_time(&self) -> MediaTime;

    /// Zero while unknown.
    fn duration(&self) -> MediaTime;

    fn orientation(&self) -> ImageOrientation {
        ImageOrientation::Portrait
    }

    fn rate(&self) -> f32;

    fn set_rate(&mut self, rate: f32);

    /// Start moving the playhead. The seek lands later; report it with
    /// [`MoviePlayer::seek_completed`].
    fn seek(&mut self, request: &SeekRequest);

    /// Whether a frame newer than the last copied one is available at `time`.
    fn has_new_frame(&self, time: MediaTime) -> bool;

    /// Copy the frame for `time`. `None` means nothing could be decoded this time.
    fn copy_frame(&mut self, time: MediaTime) -> Option<RawPixelBuffer>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoviePlayerOpts {
    pub play_rate: f32,
    /// Tolerance on both sides of a seek that resumes playback. Other seeks are exact.
    pub seek_tolerance: MediaTime,
    pub looping: bool,
}

impl Default for MoviePlayerOpts {
    fn default() -> Self {
        Self {
            play_rate: 1.0,
            seek_tolerance: DEFAULT_SEEK_TOLERANCE,
            looping: false,
        }
    }
}

/// Which side of a seek target is discarded until the seek lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropDirection {
    Before,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DropWindow {
    time: MediaTime,
    direction: DropDirection,
}

impl DropWindow {
    fn drops(&self, time: MediaTime) -> bool {
        match self.direction {
            DropDirection::Before => time <= self.time,
            DropDirection::After => time >= self.time,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekRequest {
    pub time: MediaTime,
    pub tolerance_before: MediaTime,
    pub tolerance_after: MediaTime,
    pub play_after_seeking: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeObserverId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TimeObserver {
    id: TimeObserverId,
    target: MediaTime,
}

/// Notifications delivered on the player's event channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerEvent {
    /// Playback reached an observer's target time.
    TimeReached {
        observer: TimeObserverId,
        target: MediaTime,
        time: MediaTime,
    },
    SeekFinished { time: MediaTime, success: bool },
    /// The end of the media or of the loop range was reached.
    PlayedToEnd { time: MediaTime },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
    Seeking,
}

/// Result of one [`MoviePlayer::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The clock is stopped or paused.
    Idle,
    NotReady,
    /// The playhead has not moved past zero yet.
    NotPositioned,
    /// A frame is still being processed.
    Busy,
    NoFrame,
    /// Inside the drop window of a pending seek.
    Dropped(MediaTime),
    /// Late frame after a pause.
    Skipped(MediaTime),
    /// Shown by a seek that a later seek replaced.
    Superseded(MediaTime),
    Dispatched(MediaTime),
}

#[derive(Clone, Copy, Debug)]
struct PlayRange {
    start: MediaTime,
    end: MediaTime,
    has_end_time: bool,
    looping: bool,
}

#[derive(Default)]
struct ObserverBook {
    /// Every registered observer, latest target first.
    total: Vec<TimeObserver>,
    /// Observers still to fire in the active range, latest target first.
    pending: Vec<TimeObserver>,
    did_trigger_end: bool,
    end_reached: bool,
    next_id: u64,
}

impl ObserverBook {
    fn reset(&mut self, start: MediaTime, end: MediaTime) {
        self.did_trigger_end = false;
        self.pending = self
            .total
            .iter()
            .filter(|o| o.target >= start && o.target <= end)
            .copied()
            .collect();
    }

    fn insert_pending(&mut self, observer: TimeObserver) {
        let at = self.pending.partition_point(|o| o.target >= observer.target);
        self.pending.insert(at, observer);
    }

    /// Fire everything due at `time`, and flag the end of a bounded range once.
    fn notify(&mut self, time: MediaTime, range: PlayRange, events: &mpsc::Sender<PlayerEvent>) {
        if range.has_end_time && time > range.end && !self.did_trigger_end {
            self.did_trigger_end = true;
            self.end_reached = true;
            let _ = events.send(PlayerEvent::PlayedToEnd { time });
        }
        while let Some(last) = self.pending.last().copied() {
            if last.target > time {
                break;
            }
            self.pending.pop();
            let _ = events.send(PlayerEvent::TimeReached {
                observer: last.id,
                target: last.target,
                time,
            });
        }
    }
}

fn lock_book(book: &Mutex<ObserverBook>) -> std::sync::MutexGuard<'_, ObserverBook> {
    book.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Graph node frames from a [`MoviePlayer`] are emitted from.
pub struct MovieSource {
    label: String,
}

impl Node for MovieSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn maximum_inputs(&self) -> u32 {
        0
    }

    fn new_framebuffer_available(
        &mut self,
        framebuffer: FramebufferId,
        index: u32,
        ctx: &mut NodeContext<'_>,
    ) -> LumaResult<Option<FramebufferId>> {
        tracing::warn!(index, "movie source has no inputs, frame dropped");
        ctx.cache.unlock(framebuffer);
        Ok(None)
    }
}

/// Timed source pulling frames from a [`MediaPlayback`] on an external clock.
pub struct MoviePlayer {
    playback: Box<dyn MediaPlayback>,
    queue: QueueHandle,
    node: NodeId,
    play_rate: f32,
    seek_tolerance: MediaTime,
    looping: bool,
    start_time: Option<MediaTime>,
    end_time: Option<MediaTime>,
    playing: bool,
    clock_running: bool,
    seeking: bool,
    current_seek: Option<SeekRequest>,
    next_seek: Option<SeekRequest>,
    need_render_seeking_frame: bool,
    superseded: bool,
    dropping: Option<DropWindow>,
    in_flight: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    frames_sent: Arc<AtomicU64>,
    observers: Arc<Mutex<ObserverBook>>,
    events: mpsc::Sender<PlayerEvent>,
    user_info: Option<UserInfo>,
}

impl MoviePlayer {
    /// Register a movie source node on the queue's pipeline. Returns the player and the
    /// receiving end of its event channel.
    pub fn new(
        queue: QueueHandle,
        playback: Box<dyn MediaPlayback>,
        opts: MoviePlayerOpts,
    ) -> LumaResult<(Self, mpsc::Receiver<PlayerEvent>)> {
        let node = queue.run_sync(|pipeline| {
            pipeline.add_node(MovieSource {
                label: "movie_player".to_string(),
            })
        })?;
        let (events, rx) = mpsc::channel();
        let player = Self {
            playback,
            queue,
            node,
            play_rate: opts.play_rate,
            seek_tolerance: opts.seek_tolerance,
            looping: opts.looping,
            start_time: None,
            end_time: None,
            playing: false,
            clock_running: false,
            seeking: false,
            current_seek: None,
            next_seek: None,
            need_render_seeking_frame: false,
            superseded: false,
            dropping: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            observers: Arc::new(Mutex::new(ObserverBook::default())),
            events,
            user_info: None,
        };
        Ok((player, rx))
    }

    /// The graph node frames are emitted from. Connect targets to it.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> PlaybackState {
        if self.seeking {
            PlaybackState::Seeking
        } else if self.playing {
            PlaybackState::Playing
        } else if self.clock_running {
            PlaybackState::Paused
        } else {
            PlaybackState::Stopped
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn play_rate(&self) -> f32 {
        self.play_rate
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn actual_start_time(&self) -> MediaTime {
        self.start_time.unwrap_or(MediaTime::ZERO)
    }

    pub fn actual_end_time(&self) -> MediaTime {
        self.end_time.unwrap_or_else(|| self.playback.duration())
    }

    pub fn did_play_to_end(&self) -> bool {
        self.playback.current_time() >= self.playback.duration()
    }

    /// Metadata attached to every emitted framebuffer.
    pub fn set_user_info(&mut self, info: Option<UserInfo>) {
        self.user_info = info;
    }

    pub fn playback(&self) -> &dyn MediaPlayback {
        self.playback.as_ref()
    }

    fn range(&self) -> PlayRange {
        PlayRange {
            start: self.actual_start_time(),
            end: self.actual_end_time(),
            has_end_time: self.end_time.is_some(),
            looping: self.looping,
        }
    }

    fn reset_time_observers(&self) {
        let range = self.range();
        lock_book(&self.observers).reset(range.start, range.end);
    }

    // ---- playback control ---------------------------------------------------

    /// Start from the beginning of the range if stopped or finished, otherwise resume.
    pub fn play(&mut self) {
        if !self.clock_running || self.did_play_to_end() {
            self.start();
        } else {
            self.resume();
        }
    }

    pub fn start(&mut self) {
        self.playing = true;
        self.clock_running = true;
        // A frame still queued from before the restart must not hold off the first tick.
        self.in_flight.store(false, Ordering::Release);
        self.reset_time_observers();
        let start = self.actual_start_time();
        if self.playback.current_time() != start {
            self.seek_to(start, None, true);
        } else {
            self.playback.set_rate(self.play_rate);
        }
        tracing::debug!(start = start.as_secs_f64(), looping = self.looping, "playback started");
    }

    pub fn resume(&mut self) {
        self.playing = true;
        self.clock_running = true;
        self.playback.set_rate(self.play_rate);
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.clock_running = false;
        if self.playback.rate() != 0.0 {
            self.playback.set_rate(0.0);
        }
    }

    /// Stop playback and forget pending seeks. Frames already handed to the queue are
    /// discarded when they run.
    pub fn stop(&mut self) {
        self.pause();
        lock_book(&self.observers).pending.clear();
        self.seeking = false;
        self.superseded = false;
        self.current_seek = None;
        self.next_seek = None;
        self.dropping = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::debug!("playback stopped");
    }

    /// Move the playhead to `time`. A seek issued while another is in flight replaces
    /// its target; only the latest target is sought once the running seek lands.
    pub fn seek_to(&mut self, time: MediaTime, drop: Option<DropDirection>, play_after_seeking: bool) {
        let tolerance = if play_after_seeking {
            self.playing = true;
            self.seek_tolerance
        } else {
            MediaTime::ZERO
        };
        self.next_seek = Some(SeekRequest {
            time,
            tolerance_before: tolerance,
            tolerance_after: tolerance,
            play_after_seeking,
        });
        if let Some(direction) = drop {
            self.dropping = Some(DropWindow { time, direction });
        }
        self.clock_running = true;
        if self.playback.duration() <= MediaTime::ZERO {
            tracing::warn!(target_time = time.as_secs_f64(), "cannot seek before the duration is known");
        } else {
            self.issue_next_seek();
        }
    }

    fn issue_next_seek(&mut self) {
        if self.seeking || !self.playback.is_ready() {
            return;
        }
        let Some(request) = self.next_seek else {
            return;
        };
        self.seeking = true;
        self.need_render_seeking_frame = true;
        self.current_seek = Some(request);
        tracing::trace!(target_time = request.time.as_secs_f64(), "seek issued");
        self.playback.seek(&request);
    }

    /// Report that the seek started by [`MediaPlayback::seek`] has landed.
    pub fn seek_completed(&mut self, success: bool) {
        let Some(request) = self.current_seek.take() else {
            tracing::warn!("seek completion without a seek in flight");
            return;
        };
        if success && request.play_after_seeking && self.playing {
            self.reset_time_observers();
            self.playback.set_rate(self.play_rate);
        }
        if !success {
            tracing::warn!(target_time = request.time.as_secs_f64(), "seek failed");
        }
        self.seeking = false;
        let _ = self.events.send(PlayerEvent::SeekFinished {
            time: request.time,
            success,
        });

        // The playhead now sits at a target nobody asks for anymore. Frames stay hidden
        // until the follow-up seek lands.
        self.superseded = self.next_seek.is_some_and(|next| next != request);
        if self.superseded {
            self.issue_next_seek();
        } else {
            self.next_seek = None;
        }
    }

    /// Call when the media became ready so a seek requested earlier can go out.
    pub fn playback_ready(&mut self) {
        if !self.playing || !self.playback.is_ready() {
            return;
        }
        if self.next_seek.is_some() {
            self.issue_next_seek();
        } else if self.playback.rate() != self.play_rate {
            self.playback.set_rate(self.play_rate);
        }
    }

    /// Call when the media played to its end.
    pub fn played_to_end(&mut self) {
        let _ = self.events.send(PlayerEvent::PlayedToEnd {
            time: self.playback.current_time(),
        });
        self.on_item_end();
    }

    fn on_item_end(&mut self) {
        if self.looping && self.playing {
            self.start();
        }
    }

    /// Loop over `range` (start, end), or over the whole media with `None`.
    pub fn set_loop_enabled(
        &mut self,
        enabled: bool,
        range: Option<(MediaTime, MediaTime)>,
    ) -> LumaResult<()> {
        if enabled {
            if let Some((start, end)) = range {
                if start < MediaTime::ZERO || end <= start {
                    return Err(LumaError::validation(format!(
                        "invalid loop range {}s..{}s",
                        start.as_secs_f64(),
                        end.as_secs_f64()
                    )));
                }
                self.start_time = Some(start);
                self.end_time = Some(end);
            }
        } else {
            self.start_time = None;
            self.end_time = None;
        }
        self.looping = enabled;
        self.reset_time_observers();
        Ok(())
    }

    /// Change speed. The playhead is re-sought at its current time so the new rate
    /// takes effect from a clean position.
    pub fn change_play_rate(&mut self, rate: f32) {
        let now = self.playback.current_time();
        self.play_rate = rate;
        self.next_seek = Some(SeekRequest {
            time: now,
            tolerance_before: self.seek_tolerance,
            tolerance_after: self.seek_tolerance,
            play_after_seeking: true,
        });
        self.resume();
        self.issue_next_seek();
    }

    // ---- time observers -----------------------------------------------------

    pub fn add_time_observer(&mut self, target: MediaTime) -> TimeObserverId {
        let mut book = lock_book(&self.observers);
        let id = TimeObserverId(book.next_id);
        book.next_id += 1;
        let observer = TimeObserver { id, target };
        let at = book.total.partition_point(|o| o.target >= target);
        book.total.insert(at, observer);
        if self.playing {
            book.insert_pending(observer);
        }
        id
    }

    pub fn remove_time_observer(&mut self, id: TimeObserverId) {
        let mut book = lock_book(&self.observers);
        book.total.retain(|o| o.id != id);
        book.pending.retain(|o| o.id != id);
    }

    pub fn remove_all_time_observers(&mut self) {
        let mut book = lock_book(&self.observers);
        book.total.clear();
        book.pending.clear();
    }

    pub fn pending_time_observers(&self) -> usize {
        lock_book(&self.observers).pending.len()
    }

    // ---- clock --------------------------------------------------------------

    /// Display-refresh callback.
    pub fn tick(&mut self) -> LumaResult<TickOutcome> {
        let end_reached = std::mem::take(&mut lock_book(&self.observers).end_reached);
        if end_reached {
            self.on_item_end();
        }

        if !self.clock_running {
            return Ok(TickOutcome::Idle);
        }
        if !self.playback.is_ready() {
            return Ok(TickOutcome::NotReady);
        }
        let time = self.playback.current_time();
        if !time.is_positive() {
            return Ok(TickOutcome::NotPositioned);
        }
        if self.in_flight.load(Ordering::Acquire) {
            return Ok(TickOutcome::Busy);
        }
        if !self.playback.has_new_frame(time) {
            return Ok(TickOutcome::NoFrame);
        }

        // A forward window outlives the seek itself: frames decoded before the jump can
        // still show up after it lands. A backward one only applies while seeking.
        let in_window = self.dropping.is_some_and(|d| {
            (self.seeking || d.direction == DropDirection::Before) && d.drops(time)
        });
        if in_window {
            tracing::trace!(time = time.as_secs_f64(), "frame dropped inside seek window");
            return Ok(TickOutcome::Dropped(time));
        } else if self.chasing_replaced_seek() {
            tracing::trace!(time = time.as_secs_f64(), "frame from a replaced seek hidden");
            return Ok(TickOutcome::Superseded(time));
        } else if self.need_render_seeking_frame {
            self.need_render_seeking_frame = false;
        } else if !self.seeking && !self.playing {
            return Ok(TickOutcome::Skipped(time));
        }
        self.dropping = None;

        self.in_flight.store(true, Ordering::Release);
        let Some(buffer) = self.playback.copy_frame(time) else {
            tracing::debug!(time = time.as_secs_f64(), "failed to copy frame");
            self.in_flight.store(false, Ordering::Release);
            return Ok(TickOutcome::NoFrame);
        };

        if let Err(err) = self.dispatch(buffer, time) {
            self.in_flight.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(TickOutcome::Dispatched(time))
    }

    /// A seek is in flight while a newer target waits, or the follow-up to a replaced
    /// seek has not landed yet.
    fn chasing_replaced_seek(&self) -> bool {
        self.seeking && (self.superseded || self.next_seek != self.current_seek)
    }

    fn dispatch(&self, buffer: RawPixelBuffer, time: MediaTime) -> LumaResult<()> {
        let node = self.node;
        let orientation = self.playback.orientation();
        let range = self.range();
        let playing = self.playing;
        let user_info = self.user_info.clone();
        let generation = self.generation.load(Ordering::Acquire);
        let live = Arc::clone(&self.generation);
        let in_flight = Arc::clone(&self.in_flight);
        let frames_sent = Arc::clone(&self.frames_sent);
        let observers = Arc::clone(&self.observers);
        let events = self.events.clone();

        self.queue.run_async(move |pipeline| {
            if live.load(Ordering::Acquire) != generation {
                in_flight.store(false, Ordering::Release);
                return;
            }
            let outside_loop = range.looping && playing && (time < range.start || time >= range.end);
            if outside_loop {
                tracing::debug!(time = time.as_secs_f64(), "frame outside loop range skipped");
            } else if !pipeline.targets(node).is_empty() {
                let timing = FramebufferTiming::VideoFrame(time);
                match push_raw_frame(pipeline, node, &buffer, orientation, timing, user_info) {
                    Ok(()) => {
                        frames_sent.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => tracing::warn!(error = %err, "movie frame not processed"),
                }
            }
            lock_book(&observers).notify(time, range, &events);
            in_flight.store(false, Ordering::Release);
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/sources/movie.rs"]
mod tests;
