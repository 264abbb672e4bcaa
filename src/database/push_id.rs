//! Push-id generation
//!
//! Client-side generation of the 20-character keys `push` allocates:
//! 8 characters of timestamp followed by 12 characters of randomness,
//! so ids sort chronologically. Ids generated within the same millisecond
//! increment the previous random tail instead of redrawing it, keeping
//! same-millisecond ids ordered too.

use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::Mutex;

/// Modified base64 alphabet, ordered to make ids sort lexicographically
const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

#[derive(Default)]
struct PushIdState {
    last_time: i64,
    last_rand: [usize; 12],
}

static STATE: Lazy<Mutex<PushIdState>> = Lazy::new(|| Mutex::new(PushIdState::default()));

/// Generate the next push id
pub fn next_push_id() -> String {
    let mut state = STATE.lock().expect("push id state poisoned");
    generate(&mut state, chrono::Utc::now().timestamp_millis())
}

fn generate(state: &mut PushIdState, now: i64) -> String {
    if now == state.last_time {
        // Same millisecond: increment the previous random tail
        for slot in state.last_rand.iter_mut().rev() {
            if *slot == 63 {
                *slot = 0;
            } else {
                *slot += 1;
                break;
            }
        }
    } else {
        let mut rng = rand::thread_rng();
        for slot in state.last_rand.iter_mut() {
            *slot = rng.gen_range(0..64);
        }
        state.last_time = now;
    }

    let mut id = String::with_capacity(20);
    let mut time = now;
    let mut time_chars = [0u8; 8];
    for slot in time_chars.iter_mut().rev() {
        *slot = PUSH_CHARS[(time % 64) as usize];
        time /= 64;
    }
    id.extend(time_chars.iter().map(|&c| c as char));
    id.extend(state.last_rand.iter().map(|&i| PUSH_CHARS[i] as char));
    id
}
