use std::time::Duration;

/// Every fixed delay of a practice call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTimings {
    /// How long the stage direction is shown alone before connecting.
    pub intro: Duration,
    /// Delay between connecting and adding the stage direction to the transcript.
    pub stage_direction_delay: Duration,
    /// Delay between entering the live call and offering hints.
    pub hint_reveal: Duration,
    /// Pause between failed analysis attempts.
    pub analysis_retry_delay: Duration,
    pub analysis_max_attempts: u32,
    pub reaction_lifetime: Duration,
    pub call_to_action_lifetime: Duration,
    /// Timeout for each outbound call to the practice agent.
    pub rpc_timeout: Duration,
}

impl Default for CallTimings {
    fn default() -> Self {
        Self {
            intro: Duration::from_secs(5),
            stage_direction_delay: Duration::from_secs(1),
            hint_reveal: Duration::from_secs(10),
            analysis_retry_delay: Duration::from_secs(2),
            analysis_max_attempts: 3,
            reaction_lifetime: Duration::from_secs(3),
            call_to_action_lifetime: Duration::from_secs(3),
            rpc_timeout: kiyomi_realtime::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}
