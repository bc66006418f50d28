//! Hooks over the address space of the triggering task

use super::{hook_fn, HookInfo, HookRegistry};
use crate::marshal::{
    bytes_arg, bytes_to_value, check_arity, len_arg, string_arg, transfer_len_arg, word_arg,
};
use log::debug;
use mlua::{ExternalError, Value};
use syshook_core::abi::{SYS_MMAP, SYS_MUNMAP};
use syshook_core::{Errno, InterceptError, Result, Sysno, SyscallArguments, SyscallResult, Task, Word};

fn errno_error(errno: Errno) -> mlua::Error {
    InterceptError::from(errno).into_lua_err()
}

/// Run a native syscall of `task` on its behalf
fn native_call(task: &dyn Task, sysno: Sysno, args: SyscallArguments) -> SyscallResult {
    match task.lookup_syscall(sysno) {
        Some(native) => native(task, &args),
        None => Err(Errno::ENOSYS),
    }
}

pub(super) fn register(registry: &HookRegistry) -> Result<()> {
    registry.register_dependent(
        HookInfo::new(
            "readBytes",
            "Read bytes to provided buffer by provided addr. Always tries to read count bytes",
            "\naddr\tnumber\t(data from address space will be read starting from this addr);\n\
             count\tnumber\t(amount of bytes to read from address space);\n",
            "buffer\tstring\t(contains read data)",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("readBytes", &args, 2)?;
                let addr = word_arg("readBytes", &args, 0)?;
                let count = transfer_len_arg("readBytes", &args, 1)?;
                let mut buf = vec![0u8; count];
                let n = task.copy_in_bytes(addr, &mut buf).map_err(errno_error)?;
                buf.truncate(n);
                bytes_to_value(lua, &buf)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "writeBytes",
            "Write bytes from provided buffer by provided addr. Always tries to write all bytes from buffer",
            "\naddr\tnumber\t(data from buffer will be written starting from this addr);\n\
             buffer\tstring|[]number\t(buffer which contains data to be written);\n",
            "counter\tnumber\t(amount of really written bytes)",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("writeBytes", &args, 2)?;
                let addr = word_arg("writeBytes", &args, 0)?;
                let buf = bytes_arg("writeBytes", &args, 1)?;
                let n = task.copy_out_bytes(addr, &buf).map_err(errno_error)?;
                Ok(Value::Integer(n as i64))
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "readString",
            "Read string str by provided addr",
            "\naddr\tnumber\t(string will be read starting from this addr);\n\
             count\tnumber\t(maximum amount of bytes to read from address space);\n",
            "str\tstring\t(read string)",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("readString", &args, 2)?;
                let addr = word_arg("readString", &args, 0)?;
                let max_len = transfer_len_arg("readString", &args, 1)?;
                let text = task.copy_in_string(addr, max_len).map_err(errno_error)?;
                lua.create_string(text).map(Value::String)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "writeString",
            "Write provided string by provided addr",
            "\naddr\tnumber\t(string will be written starting from this addr);\n\
             str\tstring\t(string to be written);\n",
            "count\tnumber\t(amount of bytes really written)",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("writeString", &args, 2)?;
                let addr = word_arg("writeString", &args, 0)?;
                let text = string_arg("writeString", &args, 1)?;
                let n = task.copy_out_bytes(addr, text.as_bytes()).map_err(errno_error)?;
                Ok(Value::Integer(n as i64))
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "anonMmap",
            "Creates new anonymous mapping in the virtual address space of the calling process",
            "\nlength\tnumber\t(amount of bytes to allocate);\n",
            "addr\tnumber\t(start of the new mapping)",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("anonMmap", &args, 1)?;
                let len = len_arg("anonMmap", &args, 0)? as Word;
                let prot = (libc::PROT_READ | libc::PROT_WRITE) as Word;
                let flags = (libc::MAP_ANONYMOUS | libc::MAP_PRIVATE) as Word;
                let call = SyscallArguments::new([0, len, prot, flags, 0, 0]);
                let addr = native_call(task.as_ref(), SYS_MMAP, call).map_err(errno_error)?;
                debug!("Task {} mapped {} bytes at {:#x}", task.id(), len, addr);
                Ok(Value::Integer(addr as i64))
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "munmap",
            "Delete the mappings from the specified address range",
            "\naddr\tnumber\t(start address, must be a multiple of the page size);\n\
             length\tnumber\t(amount of bytes to set range);\n",
            "null",
        ),
        |_, task| {
            hook_fn(move |_, args| {
                check_arity("munmap", &args, 2)?;
                let addr = word_arg("munmap", &args, 0)?;
                let len = len_arg("munmap", &args, 1)? as Word;
                let call = SyscallArguments::from_slice(&[addr, len]);
                native_call(task.as_ref(), SYS_MUNMAP, call).map_err(errno_error)?;
                Ok(Value::Nil)
            })
        },
    )?;

    registry.register_dependent(
        HookInfo::new(
            "getMmaps",
            "Provides mapping info like in procfs",
            "\nno args;\n",
            "str\tstring\t(mappings like in procfs)",
        ),
        |_, task| {
            hook_fn(move |lua, args| {
                check_arity("getMmaps", &args, 0)?;
                lua.create_string(task.mappings()).map(Value::String)
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookFn, HookPolicy, ScriptScope};
    use crate::marshal::script_error;
    use mlua::Lua;
    use std::sync::Arc;
    use syshook_core::mock::{MockTask, MOCK_MEMORY_BASE};

    struct Fixture {
        lua: Lua,
        task: Arc<MockTask>,
        hooks: Vec<(String, HookFn)>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = HookRegistry::new(HookPolicy::Reusable);
            register(&registry).unwrap();
            let task = Arc::new(MockTask::new(4));
            let dyn_task: Arc<dyn Task> = Arc::clone(&task) as Arc<dyn Task>;
            let hooks = registry.materialize(Some(&dyn_task), &ScriptScope::new(""));
            Fixture {
                lua: Lua::new(),
                task,
                hooks,
            }
        }

        fn call(&self, name: &str, args: Vec<Value>) -> mlua::Result<Value> {
            let (_, hook) = self.hooks.iter().find(|(n, _)| n == name).unwrap();
            hook(&self.lua, args)
        }

        fn text(&self, s: &str) -> Value {
            Value::String(self.lua.create_string(s).unwrap())
        }
    }

    fn addr(offset: u64) -> Value {
        Value::Integer((MOCK_MEMORY_BASE + offset) as i64)
    }

    #[test]
    fn test_read_bytes() {
        let f = Fixture::new();
        f.task.write_memory(MOCK_MEMORY_BASE, b"\x01\x02\x03");
        let value = f.call("readBytes", vec![addr(0), Value::Integer(3)]).unwrap();
        match value {
            Value::String(s) => assert_eq!(s.as_bytes().to_vec(), vec![1, 2, 3]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_write_bytes_from_table_and_string() {
        let f = Fixture::new();
        let table: Value = f.lua.load("return {104, 105}").eval().unwrap();
        let n = f.call("writeBytes", vec![addr(0), table]).unwrap();
        assert_eq!(n, Value::Integer(2));
        let n = f.call("writeBytes", vec![addr(2), f.text("!")]).unwrap();
        assert_eq!(n, Value::Integer(1));
        assert_eq!(f.task.read_memory(MOCK_MEMORY_BASE, 3), b"hi!");
    }

    #[test]
    fn test_write_string_has_no_terminator() {
        let f = Fixture::new();
        f.task.write_memory(MOCK_MEMORY_BASE, b"xxxxxx");
        let n = f.call("writeString", vec![addr(0), f.text("abc")]).unwrap();
        assert_eq!(n, Value::Integer(3));
        assert_eq!(f.task.read_memory(MOCK_MEMORY_BASE, 4), b"abcx");
    }

    #[test]
    fn test_read_string() {
        let f = Fixture::new();
        f.task.write_memory(MOCK_MEMORY_BASE + 8, b"/etc/passwd\0");
        let value = f.call("readString", vec![addr(8), Value::Integer(64)]).unwrap();
        assert_eq!(value, f.text("/etc/passwd"));
    }

    #[test]
    fn test_fault_is_error() {
        let f = Fixture::new();
        let err = f
            .call("readBytes", vec![Value::Integer(0), Value::Integer(4)])
            .unwrap_err();
        assert!(script_error(err).to_string().contains("EFAULT"));
    }

    #[test]
    fn test_argument_checks() {
        let f = Fixture::new();
        assert!(f.call("readBytes", vec![addr(0)]).is_err());
        assert!(f.call("readBytes", vec![addr(0), Value::Nil]).is_err());
        assert!(f.call("readBytes", vec![addr(0), Value::Integer(-1)]).is_err());
        assert!(f.call("writeString", vec![addr(0), Value::Integer(5)]).is_err());
    }

    #[test]
    fn test_oversized_transfer_is_rejected() {
        let f = Fixture::new();
        let huge = Value::Integer(1 << 62);
        let err = f.call("readBytes", vec![addr(0), huge.clone()]).unwrap_err();
        assert!(script_error(err).to_string().contains("at most 16 MiB"));
        assert!(f.call("readString", vec![addr(0), huge]).is_err());

        let limit = Value::Integer(crate::marshal::MAX_TRANSFER_LEN as i64 + 1);
        assert!(f.call("readBytes", vec![addr(0), limit]).is_err());
    }

    #[test]
    fn test_anon_mmap_then_munmap() {
        let f = Fixture::new();
        let addr = f.call("anonMmap", vec![Value::Integer(8192)]).unwrap();
        let Value::Integer(start) = addr else {
            panic!("anonMmap returned {:?}", addr);
        };
        assert_eq!(f.task.regions(), vec![(start as Word, 8192)]);

        let maps = f.call("getMmaps", Vec::new()).unwrap();
        let Value::String(maps) = maps else {
            panic!("getMmaps returned {:?}", maps);
        };
        assert!(maps.to_string_lossy().contains(&format!("{:012x}", start)));

        f.call("munmap", vec![Value::Integer(start), Value::Integer(8192)])
            .unwrap();
        assert!(f.task.regions().is_empty());
    }

    #[test]
    fn test_anon_mmap_zero_length_fails() {
        let f = Fixture::new();
        assert!(f.call("anonMmap", vec![Value::Integer(0)]).is_err());
    }
}
