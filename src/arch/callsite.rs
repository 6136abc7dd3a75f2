//! Who called the hook?
//!
//! Stable Rust has no `__builtin_return_address(0)`, and walking frame
//! pointers only works if everything was built with them. So the exported
//! symbol is a naked trampoline instead: on entry the return address is still
//! sitting where the call instruction put it, the trampoline copies it into
//! the next free argument register and tail-jumps to the real hook, which
//! takes it as one extra trailing `usize` parameter and returns straight to
//! the original caller.
//!
//! `site in N` names the zero-based argument slot that receives the address,
//! i.e. the number of arguments the exported function itself takes.

/// Define `#[no_mangle]` exports that forward their arguments plus their
/// return address to a hook.
///
/// ```ignore
/// callsite_trampoline! {
///     pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void => malloc_at, site in 1;
/// }
/// ```
#[cfg(target_arch = "x86_64")]
#[allow(unused_macros)]
macro_rules! callsite_trampoline {
    // [rsp] is the return address until something is pushed
    (@forward $target:path, 1) => {
        ::core::arch::naked_asm!("mov rsi, [rsp]", "jmp {target}", target = sym $target)
    };
    (@forward $target:path, 2) => {
        ::core::arch::naked_asm!("mov rdx, [rsp]", "jmp {target}", target = sym $target)
    };
    (@forward $target:path, 3) => {
        ::core::arch::naked_asm!("mov rcx, [rsp]", "jmp {target}", target = sym $target)
    };
    ($($body:tt)*) => {
        $crate::arch::callsite::define_trampolines!($($body)*);
    };
}

#[cfg(target_arch = "aarch64")]
#[allow(unused_macros)]
macro_rules! callsite_trampoline {
    // x30 is the link register, untouched until we call anything
    (@forward $target:path, 1) => {
        ::core::arch::naked_asm!("mov x1, x30", "b {target}", target = sym $target)
    };
    (@forward $target:path, 2) => {
        ::core::arch::naked_asm!("mov x2, x30", "b {target}", target = sym $target)
    };
    (@forward $target:path, 3) => {
        ::core::arch::naked_asm!("mov x3, x30", "b {target}", target = sym $target)
    };
    ($($body:tt)*) => {
        $crate::arch::callsite::define_trampolines!($($body)*);
    };
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[allow(unused_macros)]
macro_rules! callsite_trampoline {
    ($($body:tt)*) => {
        compile_error!("call-site capture is only implemented for x86_64 and aarch64");
    };
}

#[allow(unused_macros)]
macro_rules! define_trampolines {
    ($(
        $(#[$meta:meta])*
        pub unsafe extern $abi:tt fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty
            => $target:path, site in $slot:tt;
    )*) => {$(
        $(#[$meta])*
        #[unsafe(naked)]
        #[unsafe(no_mangle)]
        #[allow(unused_variables)]
        pub unsafe extern $abi fn $name($($arg: $ty),*) -> $ret {
            $crate::arch::callsite::callsite_trampoline!(@forward $target, $slot)
        }
    )*};
}

#[allow(unused_imports)]
pub(crate) use {callsite_trampoline, define_trampolines};
