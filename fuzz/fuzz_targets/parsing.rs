#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = unpickle::values_from_slice(data, unpickle::DeOptions::new());
});
