//! Main entry point for Keelback

#![deny(warnings, missing_docs, trivial_casts, unused_qualifications)]
#![forbid(unsafe_code)]

use keelback::application::APP;

/// Boot Keelback
fn main() {
    abscissa_core::boot(&APP);
}
