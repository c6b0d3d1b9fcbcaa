// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::flexi_logger::Logger;
use ::std::sync::Once;

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Initializes logging features.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        if let Ok(logger) = Logger::try_with_env() {
            let _ = logger.start();
        }
    });
}
