// Generated by cadence synth. Do not edit.
#[allow(dead_code)]
pub mod two_chains {
    use cadence_runtime::instruction::InstructionRecord;
    use cadence_runtime::schedule::{ScheduleTable, StaticVariant};

    pub const WORKER_COUNT: usize = 2;
    pub const REACTION_COUNT: usize = 4;
    pub const CHANNEL_COUNT: usize = 1;

    // variant 0: "full"
    static V0_W0: [InstructionRecord; 4] = [
        InstructionRecord::exec(0),
        InstructionRecord::notify(0),
        InstructionRecord::exec(1),
        InstructionRecord::stop(),
    ];
    static V0_W1: [InstructionRecord; 4] = [
        InstructionRecord::exec(2),
        InstructionRecord::wait(0),
        InstructionRecord::exec(3),
        InstructionRecord::stop(),
    ];
    static V0_TAPES: [&[InstructionRecord]; 2] = [&V0_W0, &V0_W1];
    static V0_LENGTHS: [u32; 2] = [4, 4];
    static V0_REACTIONS: [u32; 4] = [0, 1, 2, 3];

    pub static VARIANTS: [StaticVariant<'static>; 1] = [
        StaticVariant {
            name: "full",
            tapes: &V0_TAPES,
            lengths: &V0_LENGTHS,
            reactions: &V0_REACTIONS,
        },
    ];

    pub fn table() -> cadence_runtime::Result<ScheduleTable> {
        ScheduleTable::from_static(WORKER_COUNT, REACTION_COUNT, CHANNEL_COUNT, &VARIANTS)
    }
}
