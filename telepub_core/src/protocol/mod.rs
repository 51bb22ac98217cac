/*!
 * Protocol layer: value types, constants, and key generation.
 *
 * Everything related to *what* a send is:
 * - `types`: Payload, Metadata, SendKey, Confirmation
 * - `constants`: version string and configuration defaults
 * - `key`: timestamp-derived send key generation
 */

pub mod constants;
pub mod key;
pub mod types;
