use resim_core::derive_substream_seed;

/// Derives the seed of the RNG driving one schedule command within a sweep.
pub fn command_seed(master_seed: u64, sweep: usize, command_slot: usize) -> u64 {
    let intermediate = derive_substream_seed(master_seed, sweep as u64);
    derive_substream_seed(intermediate, command_slot as u64)
}
