//! Console status lines for the CLI. Callers do not need `Colorize` in scope.

#[macro_export]
macro_rules! success_message {
    ($($arg:tt)*) => {
        println!("{} {}", $crate::__status_label!("[SUCCESS]", green), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! error_message {
    ($($arg:tt)*) => {
        eprintln!("{} {}", $crate::__status_label!("  [ERROR]", red), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! warning_message {
    ($($arg:tt)*) => {
        println!("{} {}", $crate::__status_label!("[WARNING]", yellow), format!($($arg)*))
    };
}

#[macro_export]
macro_rules! info_message {
    ($($arg:tt)*) => {
        println!("{} {}", $crate::__status_label!("   [INFO]", cyan), format!($($arg)*))
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __status_label {
    ($label:literal, $color:ident) => {
        colored::Colorize::bold(colored::Colorize::$color($label))
    };
}
