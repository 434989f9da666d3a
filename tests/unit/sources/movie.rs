use std::sync::mpsc::Receiver;

use super::*;
use crate::foundation::core::GlSize;
use crate::graph::pipeline::Pipeline;
use crate::graph::queue::ProcessingQueue;
use crate::outputs::InMemoryOutput;

#[derive(Default)]
struct State {
    ready: bool,
    time: MediaTime,
    duration: MediaTime,
    rate: f32,
    seeks: Vec<SeekRequest>,
    no_new_frame: bool,
    copies: usize,
}

#[derive(Clone)]
struct FakePlayback(Arc<Mutex<State>>);

impl FakePlayback {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }
}

impl MediaPlayback for FakePlayback {
    fn is_ready(&self) -> bool {
        self.state().ready
    }

    fn current_time(&self) -> MediaTime {
        self.state().time
    }

    fn duration(&self) -> MediaTime {
        self.state().duration
    }

    fn rate(&self) -> f32 {
        self.state().rate
    }

    fn set_rate(&mut self, rate: f32) {
        self.state().rate = rate;
    }

    fn seek(&mut self, request: &SeekRequest) {
        self.state().seeks.push(*request);
    }

    fn has_new_frame(&self, _time: MediaTime) -> bool {
        !self.state().no_new_frame
    }

    fn copy_frame(&mut self, _time: MediaTime) -> Option<RawPixelBuffer> {
        self.state().copies += 1;
        Some(RawPixelBuffer::luminance8(GlSize::new(2, 2).ok()?, vec![128; 4]))
    }
}

fn ms(millis: i64) -> MediaTime {
    MediaTime::from_millis(millis)
}

struct Rig {
    queue: ProcessingQueue,
    playback: FakePlayback,
    player: MoviePlayer,
    events: Receiver<PlayerEvent>,
    out: NodeId,
}

impl Rig {
    fn new(opts: MoviePlayerOpts) -> Self {
        let queue = ProcessingQueue::spawn(Pipeline::cpu(), "luma-test-movie").unwrap();
        let playback = FakePlayback(Arc::new(Mutex::new(State {
            ready: true,
            duration: ms(10_000),
            ..State::default()
        })));
        let (player, events) =
            MoviePlayer::new(queue.handle(), Box::new(playback.clone()), opts).unwrap();
        let node = player.node();
        let out = queue
            .run_sync(move |p| {
                let out = p.add_node(InMemoryOutput::metadata_only());
                p.add_target(node, out, 0).unwrap();
                out
            })
            .unwrap();
        Self {
            queue,
            playback,
            player,
            events,
            out,
        }
    }

    fn set_time(&self, time: MediaTime) {
        self.playback.state().time = time;
    }

    /// Wait for everything dispatched so far and return the captured frame times.
    fn delivered(&self) -> Vec<FramebufferTiming> {
        let out = self.out;
        self.queue
            .run_sync(move |p| {
                p.node::<InMemoryOutput>(out)
                    .unwrap()
                    .frames()
                    .iter()
                    .map(|f| f.timing)
                    .collect()
            })
            .unwrap()
    }

    fn events(&self) -> Vec<PlayerEvent> {
        self.events.try_iter().collect()
    }

    /// Park the queue until the returned sender is dropped or used.
    fn block_queue(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel::<()>();
        self.queue
            .run_async(move |_| {
                let _ = rx.recv();
            })
            .unwrap();
        tx
    }
}

#[test]
fn tick_reports_why_nothing_was_sent() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Idle);
    assert_eq!(r.player.state(), PlaybackState::Stopped);

    r.player.start();
    assert_eq!(r.player.state(), PlaybackState::Playing);
    assert_eq!(r.playback.state().rate, 1.0);
    assert_eq!(r.player.tick().unwrap(), TickOutcome::NotPositioned);

    r.set_time(ms(40));
    r.playback.state().no_new_frame = true;
    assert_eq!(r.player.tick().unwrap(), TickOutcome::NoFrame);
    r.playback.state().ready = false;
    assert_eq!(r.player.tick().unwrap(), TickOutcome::NotReady);
}

#[test]
fn playing_dispatches_video_frames() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(40));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(40)));
    r.delivered();
    r.set_time(ms(80));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(80)));

    assert_eq!(
        r.delivered(),
        vec![
            FramebufferTiming::VideoFrame(ms(40)),
            FramebufferTiming::VideoFrame(ms(80))
        ]
    );
    assert_eq!(r.player.frames_sent(), 2);
    assert!(!r.player.is_processing());
}

#[test]
fn only_one_frame_is_in_flight() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(40));

    let gate = r.block_queue();
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(40)));
    r.set_time(ms(80));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Busy);
    assert!(r.player.is_processing());
    assert_eq!(r.playback.state().copies, 1);

    gate.send(()).unwrap();
    assert_eq!(r.delivered().len(), 1);
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(80)));
}

#[test]
fn seeks_issued_while_seeking_coalesce_to_the_latest() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.seek_to(ms(5_000), None, false);
    r.player.seek_to(ms(6_000), None, false);
    r.player.seek_to(ms(7_000), None, false);
    assert!(r.player.is_seeking());
    assert_eq!(r.playback.state().seeks.len(), 1);

    r.player.seek_completed(true);
    {
        let state = r.playback.state();
        assert_eq!(state.seeks.len(), 2);
        assert_eq!(state.seeks[1].time, ms(7_000));
        assert_eq!(state.seeks[1].tolerance_before, MediaTime::ZERO);
    }

    r.player.seek_completed(true);
    assert!(!r.player.is_seeking());
    assert_eq!(r.playback.state().seeks.len(), 2);
    assert_eq!(
        r.events(),
        vec![
            PlayerEvent::SeekFinished {
                time: ms(5_000),
                success: true
            },
            PlayerEvent::SeekFinished {
                time: ms(7_000),
                success: true
            },
        ]
    );
}

#[test]
fn replaced_seek_target_is_never_shown() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.seek_to(ms(5_000), None, false);
    r.player.seek_to(ms(7_000), None, false);

    // still on the old position while the first seek runs
    r.set_time(ms(1_000));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Superseded(ms(1_000)));

    // the first seek lands at 5s, the follow-up to 7s goes out
    r.set_time(ms(5_000));
    r.player.seek_completed(true);
    assert!(r.player.is_seeking());
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Superseded(ms(5_000)));
    r.set_time(ms(5_040));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Superseded(ms(5_040)));
    assert!(r.delivered().is_empty());

    r.set_time(ms(7_000));
    r.player.seek_completed(true);
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(7_000)));
    assert_eq!(r.delivered(), vec![FramebufferTiming::VideoFrame(ms(7_000))]);
    assert_eq!(r.playback.state().copies, 1);
}

#[test]
fn replaced_seek_stays_hidden_while_playing() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(40));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(40)));
    r.delivered();

    r.player.seek_to(ms(5_000), None, true);
    r.player.seek_to(ms(7_000), None, true);
    r.set_time(ms(5_000));
    r.player.seek_completed(true);
    // the rate resumed with the first landing, the playhead runs on from 5s
    r.set_time(ms(5_080));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Superseded(ms(5_080)));

    r.set_time(ms(7_000));
    r.player.seek_completed(true);
    r.set_time(ms(7_040));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(7_040)));
    assert_eq!(
        r.delivered(),
        vec![
            FramebufferTiming::VideoFrame(ms(40)),
            FramebufferTiming::VideoFrame(ms(7_040))
        ]
    );
}

#[test]
fn restart_clears_a_frame_left_in_flight() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(40));

    let gate = r.block_queue();
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(40)));
    assert!(r.player.is_processing());

    r.player.start();
    assert!(!r.player.is_processing());
    r.set_time(ms(80));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(80)));
    drop(gate);
}

#[test]
fn seek_waits_for_a_known_duration() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.playback.state().duration = MediaTime::ZERO;
    r.player.seek_to(ms(1_000), None, true);
    assert!(r.playback.state().seeks.is_empty());

    r.playback.state().duration = ms(10_000);
    r.player.playback_ready();
    let seeks = r.playback.state().seeks.clone();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].tolerance_after, DEFAULT_SEEK_TOLERANCE);
    assert!(seeks[0].play_after_seeking);
}

#[test]
fn failed_seek_does_not_resume_the_rate() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.seek_to(ms(2_000), None, true);
    r.player.seek_completed(false);
    assert_eq!(r.playback.state().rate, 0.0);
    assert_eq!(
        r.events(),
        vec![PlayerEvent::SeekFinished {
            time: ms(2_000),
            success: false
        }]
    );

    r.player.seek_to(ms(3_000), None, true);
    r.player.seek_completed(true);
    assert_eq!(r.playback.state().rate, 1.0);
}

#[test]
fn frames_inside_the_drop_window_are_discarded() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.seek_to(ms(2_000), Some(DropDirection::Before), false);

    r.set_time(ms(1_000));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dropped(ms(1_000)));
    r.player.seek_completed(true);
    // late frames from before the jump are still dropped once the seek has landed
    r.set_time(ms(1_500));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dropped(ms(1_500)));

    r.set_time(ms(2_040));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(2_040)));
    assert_eq!(r.delivered(), vec![FramebufferTiming::VideoFrame(ms(2_040))]);
}

#[test]
fn backward_window_ends_when_the_seek_lands() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(5_000));
    r.player.seek_to(ms(1_000), Some(DropDirection::After), true);

    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dropped(ms(5_000)));
    r.player.seek_completed(true);
    r.set_time(ms(1_040));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(1_040)));
    assert_eq!(r.delivered(), vec![FramebufferTiming::VideoFrame(ms(1_040))]);
}

#[test]
fn paused_seek_renders_one_frame_then_skips() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.seek_to(ms(1_000), None, false);
    r.player.seek_completed(true);
    assert_eq!(r.player.state(), PlaybackState::Paused);

    r.set_time(ms(1_000));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(1_000)));
    r.delivered();
    r.set_time(ms(1_040));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Skipped(ms(1_040)));
}

#[test]
fn time_observers_fire_in_order() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    let first = r.player.add_time_observer(ms(1_000));
    let third = r.player.add_time_observer(ms(3_000));
    let second = r.player.add_time_observer(ms(2_000));
    assert_eq!(r.player.pending_time_observers(), 3);

    r.set_time(ms(2_000));
    r.player.tick().unwrap();
    r.delivered();
    let fired: Vec<_> = r
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::TimeReached { observer, .. } => Some(observer),
            _ => None,
        })
        .collect();
    assert_eq!(fired, vec![first, second]);
    assert_eq!(r.player.pending_time_observers(), 1);

    r.player.remove_time_observer(third);
    assert_eq!(r.player.pending_time_observers(), 0);
}

#[test]
fn bounded_loop_restarts_from_its_start() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    assert!(matches!(
        r.player.set_loop_enabled(true, Some((ms(2_000), ms(1_000)))),
        Err(LumaError::Validation(_))
    ));
    assert_eq!(r.player.actual_end_time(), ms(10_000));

    r.player.set_loop_enabled(true, Some((ms(1_000), ms(2_000)))).unwrap();
    assert_eq!(r.player.actual_start_time(), ms(1_000));
    assert_eq!(r.player.actual_end_time(), ms(2_000));

    r.player.start();
    assert_eq!(r.playback.state().seeks.len(), 1);
    r.player.seek_completed(true);

    r.set_time(ms(2_500));
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(2_500)));
    // outside the loop range: nothing reaches the graph
    assert!(r.delivered().is_empty());
    assert!(
        r.events()
            .contains(&PlayerEvent::PlayedToEnd { time: ms(2_500) })
    );

    r.player.tick().unwrap();
    let seeks = r.playback.state().seeks.clone();
    assert_eq!(seeks.len(), 2);
    assert_eq!(seeks[1].time, ms(1_000));
}

#[test]
fn stop_discards_frames_already_queued() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(40));

    let gate = r.block_queue();
    assert_eq!(r.player.tick().unwrap(), TickOutcome::Dispatched(ms(40)));
    r.player.stop();
    drop(gate);

    assert!(r.delivered().is_empty());
    assert!(!r.player.is_processing());
    assert_eq!(r.player.state(), PlaybackState::Stopped);
}

#[test]
fn play_rate_change_reseeks_at_the_current_time() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.start();
    r.set_time(ms(3_000));
    r.player.change_play_rate(2.0);
    let seek = r.playback.state().seeks[0];
    assert_eq!(seek.time, ms(3_000));
    assert!(seek.play_after_seeking);

    r.player.seek_completed(true);
    assert_eq!(r.playback.state().rate, 2.0);
    assert_eq!(r.player.play_rate(), 2.0);
}

#[test]
fn user_info_rides_on_every_frame() {
    let mut r = Rig::new(MoviePlayerOpts::default());
    r.player.set_user_info(Some(Arc::new("take-3")));
    r.player.start();
    r.set_time(ms(40));
    r.player.tick().unwrap();

    let out = r.out;
    let tag = r
        .queue
        .run_sync(move |p| {
            let frame = p.node::<InMemoryOutput>(out).unwrap().last().unwrap().clone();
            frame
                .user_info
                .and_then(|info| info.downcast_ref::<&str>().map(|s| s.to_string()))
        })
        .unwrap();
    assert_eq!(tag.as_deref(), Some("take-3"));
}
