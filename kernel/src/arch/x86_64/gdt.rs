//! GDT and TSS (spec §3, §4.3).
//!
//! Five 8-byte descriptors (null, kernel-code-64, kernel-data, user-code-64,
//! user-data) followed by the 16-byte TSS descriptor, which therefore lands
//! at selector 0x28. Grounded in `original_source/src/cpu/gdt.c`.

use lazy_static::lazy_static;
use x86_64::{
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
    VirtAddr,
};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

lazy_static! {
    static ref TSS: TaskStateSegment = {
        let mut tss = TaskStateSegment::new();

        tss.privilege_stack_table[0] = {
            const STACK_SIZE: usize = 4096 * 5;
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut KERNEL_STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);
            let stack_ptr = &raw const KERNEL_STACK;
            VirtAddr::from_ptr(stack_ptr) + STACK_SIZE as u64
        };

        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = {
            const STACK_SIZE: usize = 4096 * 5;
            #[repr(align(16))]
            struct AlignedStack([u8; STACK_SIZE]);
            static mut STACK: AlignedStack = AlignedStack([0; STACK_SIZE]);
            let stack_ptr = &raw const STACK;
            VirtAddr::from_ptr(stack_ptr) + STACK_SIZE as u64
        };
        tss
    };
}

lazy_static! {
    static ref GDT: (GlobalDescriptorTable, Selectors) = {
        let mut gdt = GlobalDescriptorTable::new();
        let code_selector = gdt.append(Descriptor::kernel_code_segment()); // 0x08
        let data_selector = gdt.append(Descriptor::kernel_data_segment()); // 0x10
        let user_code_selector = gdt.append(Descriptor::user_code_segment()); // 0x18 (+RPL3 = 0x1B)
        let user_data_selector = gdt.append(Descriptor::user_data_segment()); // 0x20 (+RPL3 = 0x23)
        let tss_selector = gdt.append(Descriptor::tss_segment(&TSS)); // 0x28 (2 entries)
        (
            gdt,
            Selectors {
                code_selector,
                data_selector,
                tss_selector,
                user_code_selector,
                user_data_selector,
            },
        )
    };
}

/// GDT segment selectors (spec §3: five descriptors plus the TSS at 0x28).
///
/// The kernel never switches to ring 3 (no process abstraction exists yet),
/// so the user selectors are reserved but unused.
pub struct Selectors {
    pub code_selector: SegmentSelector,
    pub data_selector: SegmentSelector,
    pub tss_selector: SegmentSelector,
    pub user_code_selector: SegmentSelector,
    pub user_data_selector: SegmentSelector,
}

pub fn init() {
    use x86_64::instructions::{
        segmentation::{Segment, CS, DS},
        tables::load_tss,
    };

    GDT.0.load();
    // SAFETY: the GDT was just loaded above; these selectors were computed
    // from that same table.
    unsafe {
        CS::set_reg(GDT.1.code_selector);
        DS::set_reg(GDT.1.data_selector);
        load_tss(GDT.1.tss_selector);
    }
}

pub fn selectors() -> &'static Selectors {
    &GDT.1
}

/// Updates TSS `RSP0`. Called by the scheduler on every context switch
/// (spec §3, §4.7) so the next ring-0 entry uses the new thread's stack.
pub fn set_kernel_stack(stack_top: u64) {
    // SAFETY: called with interrupts disabled from the scheduler, which is
    // the only writer of `privilege_stack_table[0]`.
    unsafe {
        let tss_ptr = &*TSS as *const TaskStateSegment as *mut TaskStateSegment;
        (*tss_ptr).privilege_stack_table[0] = VirtAddr::new(stack_top);
    }
}

pub fn get_kernel_stack() -> u64 {
    TSS.privilege_stack_table[0].as_u64()
}
