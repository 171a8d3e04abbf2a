//! Fuzz target for options parsing and resolution.
//!
//! This tests that arbitrary JSON never panics when parsed into options,
//! resolved, merged, or turned into stream requests.

#![no_main]

use libfuzzer_sys::fuzz_target;
use persist_supervisor::config::{PersistOptions, SupervisorConfig};
use persist_supervisor::{Side, UpdateSeq};

fuzz_target!(|data: (&str, &str)| {
    let (first, second) = data;

    let Ok(mut options) = PersistOptions::from_json(first) else {
        return;
    };
    if let Ok(more) = PersistOptions::from_json(second) {
        options.merge(more);
    }

    let config = SupervisorConfig::resolve(&options);
    assert!(config.backoff.starting > std::time::Duration::ZERO);
    assert!(config.backoff.factor.is_finite());

    for side in Side::ALL {
        let stream_opts = config.stream_options(side);
        // `live` is always present, even if overridden.
        assert!(stream_opts.contains_key("live"));
        let _ = config.stream_request(side);
    }

    let feed = config.change_feed_options(&UpdateSeq::Opaque(second.to_string()));
    assert!(feed.contains_key("since"));
});
