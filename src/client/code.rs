//! 세션 코드 생성/검증
//!
//! `형용사-명사-동사-동물` 형식의 읽기 쉬운 코드입니다. 피어 ID와는 무관하며,
//! 릴레이는 이 코드를 격리된 랑데부 스코프로 사용합니다.

use crate::error::SessionError;
use rand::seq::SliceRandom;

const ADJECTIVES: &[&str] = &[
    "swift", "strong", "brave", "mighty", "rapid", "blazing", "fierce", "bold", "turbo", "power",
    "epic", "mega", "super", "ultra", "stellar", "cosmic", "thunder", "lightning", "storm", "wild",
    "golden", "silver", "crimson", "azure",
];

const NOUNS: &[&str] = &[
    "mountain", "valley", "river", "peak", "summit", "ridge", "canyon", "plateau", "rider",
    "cycler", "racer", "climber", "sprinter", "champion", "legend", "hero", "wheel", "pedal",
    "chain", "spoke", "saddle", "handle", "frame", "gear",
];

const VERBS: &[&str] = &[
    "riding", "climbing", "sprinting", "racing", "crushing", "dominating", "flying", "soaring",
    "blazing", "rolling", "spinning", "pushing", "grinding", "attacking", "charging", "surging",
];

const ANIMALS: &[&str] = &[
    "falcon", "eagle", "hawk", "cheetah", "leopard", "jaguar", "panther", "tiger", "lion", "wolf",
    "bear", "shark", "dragon", "phoenix", "griffin", "mustang", "stallion", "gazelle", "cobra",
    "viper", "raptor", "condor", "raven", "owl",
];

const WORD_COUNT: usize = 4;
const MAX_WORD_LEN: usize = 16;

/// 새 세션 코드 (예: `swift-mountain-climbing-falcon`)
pub fn generate_session_code() -> String {
    let mut rng = rand::thread_rng();
    [ADJECTIVES, NOUNS, VERBS, ANIMALS]
        .iter()
        .map(|words| *words.choose(&mut rng).unwrap_or(&"ride"))
        .collect::<Vec<_>>()
        .join("-")
}

/// 입력된 코드를 정규화하고 형식을 검증
pub fn normalize_session_code(raw: &str) -> Result<String, SessionError> {
    let code = raw.trim().to_ascii_lowercase();
    let words: Vec<&str> = code.split('-').collect();

    let well_formed = words.len() == WORD_COUNT
        && words.iter().all(|word| {
            !word.is_empty()
                && word.len() <= MAX_WORD_LEN
                && word.chars().all(|c| c.is_ascii_lowercase())
        });

    if well_formed {
        Ok(code)
    } else {
        Err(SessionError::InvalidSessionCode(raw.trim().to_string()))
    }
}
